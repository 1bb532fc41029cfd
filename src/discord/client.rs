use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::time::Duration;

use crate::archive::config::DiscordConfig;
use crate::archive::model::Message;
use crate::archive::source::HistorySource;
use crate::discord::types::{RateLimitBody, WireChannel, WireGuild, WireMessage, WireUser};
use crate::error::ArchiveError;

const USER_AGENT: &str = concat!("DiscordBot (chanlog, ", env!("CARGO_PKG_VERSION"), ")");
const MEDIA_CONNECT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub guild_id: Option<String>,
}

/// Authenticated REST session, shared by reference for the whole run.
pub struct DiscordSession {
    api: Client,
    media: Client,
    api_base: String,
    token: String,
    bot: WireUser,
}

fn check_status(endpoint: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let err = match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = response
                .json::<RateLimitBody>()
                .map(|body| body.retry_after)
                .unwrap_or(0.0);
            ArchiveError::RateLimited {
                endpoint: endpoint.to_string(),
                retry_after_secs,
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ArchiveError::Unauthorized {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        },
        _ => ArchiveError::HttpStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        },
    };
    Err(err.into())
}

fn transport(endpoint: &str) -> impl FnOnce(reqwest::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Transport {
        endpoint: endpoint.to_string(),
        source,
    }
}

impl DiscordSession {
    /// Builds the HTTP clients and checks the credential against `/users/@me`.
    pub fn connect(cfg: &DiscordConfig, token: &str) -> Result<Self> {
        let api = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("failed to build api client")?;
        let media = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(MEDIA_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(cfg.attachment_timeout_secs))
            .build()
            .context("failed to build media client")?;

        let mut session = Self {
            api,
            media,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            bot: WireUser {
                id: String::new(),
                username: String::new(),
                global_name: None,
            },
        };
        session.bot = session.get_json("/users/@me", &[])?;
        Ok(session)
    }

    pub fn bot_name(&self) -> &str {
        &self.bot.username
    }

    pub fn bot_id(&self) -> &str {
        &self.bot.id
    }

    pub fn close(self) -> String {
        format!("{} ({})", self.bot.username, self.bot.id)
    }

    fn get_json<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.api_base, endpoint);
        let response = self
            .api
            .get(&url)
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .query(query)
            .send()
            .map_err(transport(endpoint))?;
        let response = check_status(endpoint, response)?;
        let parsed = response.json::<T>().map_err(transport(endpoint))?;
        Ok(parsed)
    }

    pub fn channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        let wire: WireChannel = self.get_json(&format!("/channels/{channel_id}"), &[])?;
        Ok(ChannelInfo {
            name: wire.name.unwrap_or_else(|| wire.id.clone()),
            id: wire.id,
            guild_id: wire.guild_id,
        })
    }

    pub fn guild_name(&self, guild_id: &str) -> Result<String> {
        let wire: WireGuild = self.get_json(&format!("/guilds/{guild_id}"), &[])?;
        Ok(wire.name)
    }

    pub fn user_display_name(&self, user_id: &str) -> Result<String> {
        let wire: WireUser = self.get_json(&format!("/users/{user_id}"), &[])?;
        Ok(wire.display_name().to_string())
    }
}

impl HistorySource for DiscordSession {
    fn fetch_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        let wire: Vec<WireMessage> =
            self.get_json(&format!("/channels/{channel_id}/messages"), &query)?;
        wire.into_iter().map(Message::try_from).collect()
    }

    fn open_attachment(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        let response = self.media.get(url).send().map_err(transport(url))?;
        let response = check_status(url, response)?;
        Ok(Box::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    struct Canned {
        prefix: &'static str,
        status: u16,
        body: String,
    }

    /// Serves `connections` requests, answering with the first route whose
    /// prefix matches the request target. Returns the base url and a log of
    /// request lines plus authorization headers.
    fn serve(routes: Vec<Canned>, connections: usize) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        thread::spawn(move || {
            for stream in listener.incoming().take(connections) {
                let mut stream = stream.expect("accept");
                let mut raw = Vec::new();
                let mut buf = [0u8; 1024];
                while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).expect("read");
                    if n == 0 {
                        break;
                    }
                    raw.extend_from_slice(&buf[..n]);
                }
                let text = String::from_utf8_lossy(&raw).into_owned();
                let request_line = text.lines().next().unwrap_or_default().to_string();
                let target = request_line.split(' ').nth(1).unwrap_or_default().to_string();
                let auth = text
                    .lines()
                    .find(|l| l.to_ascii_lowercase().starts_with("authorization:"))
                    .and_then(|l| l.split_once(':'))
                    .map(|(_, value)| format!("authorization: {}", value.trim()))
                    .unwrap_or_else(|| "authorization: none".to_string());
                seen.lock().unwrap().push(format!("{request_line} | {auth}"));

                let (status, body) = routes
                    .iter()
                    .find(|r| target.starts_with(r.prefix))
                    .map(|r| (r.status, r.body.clone()))
                    .unwrap_or((404, "{}".to_string()));
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).expect("write");
            }
        });
        (format!("http://{addr}"), log)
    }

    fn config(api_base: &str) -> DiscordConfig {
        DiscordConfig {
            bot_token: None,
            api_base: api_base.to_string(),
            request_timeout_secs: 5,
            attachment_timeout_secs: 1,
        }
    }

    fn me() -> Canned {
        Canned {
            prefix: "/users/@me",
            status: 200,
            body: r#"{"id":"1","username":"archiver"}"#.to_string(),
        }
    }

    #[test]
    fn connect_verifies_token_and_pages_with_cursor() {
        let page = r#"[{"id":"20","content":"x","timestamp":"2024-01-01T00:00:00+00:00","author":{"id":"3","username":"u"},"attachments":[]}]"#;
        let (base, log) = serve(
            vec![
                me(),
                Canned {
                    prefix: "/channels/9/messages",
                    status: 200,
                    body: page.to_string(),
                },
            ],
            2,
        );

        let session = DiscordSession::connect(&config(&base), "secret").expect("connect");
        assert_eq!(session.bot_name(), "archiver");
        let messages = session.fetch_page("9", Some("25"), 100).expect("page");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "20");

        let log = log.lock().unwrap();
        assert!(log[0].starts_with("GET /users/@me "));
        assert!(log[0].ends_with("authorization: Bot secret"));
        assert!(log[1].starts_with("GET /channels/9/messages?limit=100&before=25 "));
    }

    #[test]
    fn rejected_token_maps_to_unauthorized() {
        let (base, _log) = serve(
            vec![Canned {
                prefix: "/users/@me",
                status: 401,
                body: r#"{"message":"401: Unauthorized","code":0}"#.to_string(),
            }],
            1,
        );
        let err = DiscordSession::connect(&config(&base), "bad")
            .err()
            .expect("should fail");
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::Unauthorized { status: 401, .. })
        ));
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let (base, _log) = serve(
            vec![
                me(),
                Canned {
                    prefix: "/channels/9/messages",
                    status: 429,
                    body: r#"{"message":"You are being rate limited.","retry_after":0.75,"global":false}"#
                        .to_string(),
                },
            ],
            2,
        );
        let session = DiscordSession::connect(&config(&base), "t").expect("connect");
        let err = session.fetch_page("9", None, 100).expect_err("limited");
        match err.downcast_ref::<ArchiveError>() {
            Some(ArchiveError::RateLimited {
                retry_after_secs, ..
            }) => assert!((retry_after_secs - 0.75).abs() < f64::EPSILON),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn attachments_stream_without_bot_credentials() {
        let (base, log) = serve(
            vec![
                me(),
                Canned {
                    prefix: "/media/a.txt",
                    status: 200,
                    body: "attachment-bytes".to_string(),
                },
            ],
            2,
        );
        let session = DiscordSession::connect(&config(&base), "t").expect("connect");
        let mut body = session
            .open_attachment(&format!("{base}/media/a.txt"))
            .expect("open");
        let mut got = String::new();
        body.read_to_string(&mut got).expect("read body");
        assert_eq!(got, "attachment-bytes");
        assert!(log.lock().unwrap()[1].ends_with("authorization: none"));
    }

    #[test]
    fn stalled_media_body_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));
        thread::spawn(move || {
            let mut held = Vec::new();
            for (n, stream) in listener.incoming().take(2).enumerate() {
                let mut stream = stream.expect("accept");
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = if n == 0 {
                    let body = r#"{"id":"1","username":"archiver"}"#;
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    )
                } else {
                    "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 4096\r\n\r\npartial".to_string()
                };
                stream.write_all(response.as_bytes()).expect("write");
                held.push(stream);
            }
            thread::sleep(Duration::from_secs(10));
        });

        let session = DiscordSession::connect(&config(&base), "t").expect("connect");
        let started = std::time::Instant::now();
        let outcome = session
            .open_attachment(&format!("{base}/media/slow.png"))
            .and_then(|mut body| {
                let mut sink = Vec::new();
                body.read_to_end(&mut sink)?;
                Ok(sink)
            });
        assert!(outcome.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_media_is_an_error() {
        let (base, _log) = serve(vec![me()], 2);
        let session = DiscordSession::connect(&config(&base), "t").expect("connect");
        assert!(session.open_attachment(&format!("{base}/media/gone.png")).is_err());
    }
}
