use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tempfile::NamedTempFile;

use crate::archive::model::Message;
use crate::archive::paths::ATTACHMENTS_DIR_NAME;
use crate::archive::source::HistorySource;
use crate::archive::warn::{self, WarnEvent};

const MAX_NAME_BYTES: usize = 180;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentStats {
    pub downloaded: usize,
    pub failed: usize,
}

impl AttachmentStats {
    pub fn add(&mut self, other: AttachmentStats) {
        self.downloaded += other.downloaded;
        self.failed += other.failed;
    }
}

pub fn safe_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut leading = true;
    for ch in name.trim().chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            '.' if leading => '_',
            c if c.is_control() => '_',
            c => c,
        };
        leading = leading && ch == '.';
        if out.len() + mapped.len_utf8() > MAX_NAME_BYTES {
            break;
        }
        out.push(mapped);
    }
    if out.trim_matches('_').is_empty() {
        "attachment".to_string()
    } else {
        out
    }
}

/// One file name per attachment: `{messageId}_{name}`, or `{messageId}_{n}_{name}`
/// when the sanitized name already appeared on the same message.
pub fn plan_file_names(message: &Message) -> Vec<String> {
    let mut used = HashSet::new();
    message
        .attachments
        .iter()
        .map(|attachment| {
            let safe = safe_file_name(&attachment.name);
            let mut candidate = format!("{}_{safe}", message.id);
            let mut n = 2usize;
            while used.contains(&candidate) {
                candidate = format!("{}_{n}_{safe}", message.id);
                n += 1;
            }
            used.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// Bytes land in a temporary file next to the target and are renamed into
/// place only after the whole body arrived.
pub fn download_attachment<S: HistorySource + ?Sized>(
    source: &S,
    url: &str,
    file_name: &str,
    attachments_dir: &Path,
) -> Result<PathBuf> {
    let target = attachments_dir.join(file_name);
    let mut body = source
        .open_attachment(url)
        .with_context(|| format!("failed to fetch attachment {file_name}"))?;

    let mut staged = NamedTempFile::new_in(attachments_dir)
        .with_context(|| format!("failed to stage file in {}", attachments_dir.display()))?;
    io::copy(&mut body, staged.as_file_mut())
        .with_context(|| format!("failed to stream attachment {file_name}"))?;
    staged
        .persist(&target)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

fn relative_local_path(written: &Path) -> String {
    let file_name = written
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{ATTACHMENTS_DIR_NAME}/{file_name}")
}

type JobResult = (usize, usize, Result<PathBuf>);

/// Failures are logged and counted; the attachment stays on its message
/// without a `local_path`.
pub fn archive_attachments<S: HistorySource + ?Sized>(
    source: &S,
    channel_id: &str,
    messages: &mut [Message],
    attachments_dir: &Path,
    workers: usize,
) -> AttachmentStats {
    let jobs = messages
        .iter()
        .enumerate()
        .flat_map(|(m, message)| {
            plan_file_names(message)
                .into_iter()
                .enumerate()
                .map(move |(a, file_name)| (m, a, file_name))
        })
        .collect::<Vec<_>>();
    let mut stats = AttachmentStats::default();
    if jobs.is_empty() {
        return stats;
    }

    let worker_count = workers.clamp(1, jobs.len());
    let results = {
        let messages: &[Message] = messages;
        let jobs = &jobs;
        let next = &AtomicUsize::new(0);
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(worker_count);
            for _ in 0..worker_count {
                handles.push(scope.spawn(move || {
                    let mut done: Vec<JobResult> = Vec::new();
                    loop {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some((m, a, file_name)) = jobs.get(idx) else {
                            break;
                        };
                        let attachment = &messages[*m].attachments[*a];
                        let outcome =
                            download_attachment(source, &attachment.url, file_name, attachments_dir);
                        done.push((*m, *a, outcome));
                    }
                    done
                }));
            }
            let mut all = Vec::with_capacity(jobs.len());
            for handle in handles {
                match handle.join() {
                    Ok(done) => all.extend(done),
                    Err(_) => warn::emit(WarnEvent {
                        code: "ATTACHMENT_WORKER_PANIC",
                        stage: "attachments",
                        action: "join-worker",
                        channel: channel_id,
                        message: "",
                        target: &attachments_dir.display().to_string(),
                        reason: "worker-panicked",
                        err: "",
                    }),
                }
            }
            all
        })
    };

    for (m, a, outcome) in results {
        let message = &mut messages[m];
        let message_id = message.id.clone();
        let attachment = &mut message.attachments[a];
        match outcome {
            Ok(written) => {
                attachment.local_path = Some(relative_local_path(&written));
                stats.downloaded += 1;
            }
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "ATTACHMENT_FAILED",
                    stage: "attachments",
                    action: "download",
                    channel: channel_id,
                    message: &message_id,
                    target: &attachment.name,
                    reason: "kept-without-local-path",
                    err: &format!("{err:#}"),
                });
                stats.failed += 1;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::model::{Attachment, Author};
    use anyhow::bail;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::fs;
    use std::io::Read;
    use tempfile::tempdir;

    struct MediaOnly {
        bodies: HashMap<String, Vec<u8>>,
    }

    impl HistorySource for MediaOnly {
        fn fetch_page(&self, _: &str, _: Option<&str>, _: usize) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }

        fn open_attachment(&self, url: &str) -> Result<Box<dyn Read + Send>> {
            match self.bodies.get(url) {
                Some(bytes) => Ok(Box::new(io::Cursor::new(bytes.clone()))),
                None => bail!("status 404 for {url}"),
            }
        }
    }

    fn message(id: &str, attachments: Vec<Attachment>) -> Message {
        Message {
            id: id.to_string(),
            author: Author {
                id: "1".to_string(),
                display_name: "ann".to_string(),
            },
            content: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            attachments,
        }
    }

    #[test]
    fn safe_file_name_strips_path_tricks() {
        assert_eq!(safe_file_name("../../etc/passwd"), "___.._etc_passwd");
        assert_eq!(safe_file_name("a\\b:c.png"), "a_b_c.png");
        assert_eq!(safe_file_name(".hidden"), "_hidden");
        assert_eq!(safe_file_name("cat photo.jpg"), "cat photo.jpg");
        assert_eq!(safe_file_name("   "), "attachment");
        assert_eq!(safe_file_name("///"), "attachment");
    }

    #[test]
    fn safe_file_name_bounds_length() {
        let long = "é".repeat(400);
        let got = safe_file_name(&long);
        assert!(got.len() <= MAX_NAME_BYTES);
        assert!(got.chars().all(|c| c == 'é'));
    }

    #[test]
    fn download_writes_prefixed_file_byte_for_byte() {
        let tmp = tempdir().expect("tempdir");
        let source = MediaOnly {
            bodies: HashMap::from([("u1".to_string(), vec![0u8, 1, 2, 255])]),
        };
        let written = download_attachment(&source, "u1", "900_pic.png", tmp.path())
            .expect("download");
        assert_eq!(written, tmp.path().join("900_pic.png"));
        assert_eq!(fs::read(&written).expect("read"), vec![0u8, 1, 2, 255]);
    }

    struct StallsMidBody;

    impl HistorySource for StallsMidBody {
        fn fetch_page(&self, _: &str, _: Option<&str>, _: usize) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }

        fn open_attachment(&self, _: &str) -> Result<Box<dyn Read + Send>> {
            let timed_out = io::Error::new(io::ErrorKind::TimedOut, "operation timed out");
            Ok(Box::new(io::Cursor::new(b"partial".to_vec()).chain(FailingReader(Some(timed_out)))))
        }
    }

    struct FailingReader(Option<io::Error>);

    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            match self.0.take() {
                Some(err) => Err(err),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn body_timeout_counts_as_failure_without_partial_file() {
        let tmp = tempdir().expect("tempdir");
        let mut messages = vec![message("40", vec![Attachment::new("big.png", "u")])];
        let stats = archive_attachments(&StallsMidBody, "5", &mut messages, tmp.path(), 2);
        assert_eq!(
            stats,
            AttachmentStats {
                downloaded: 0,
                failed: 1
            }
        );
        assert_eq!(messages[0].attachments[0].local_path, None);
        assert_eq!(fs::read_dir(tmp.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn failed_download_leaves_no_partial_file() {
        let tmp = tempdir().expect("tempdir");
        let source = MediaOnly {
            bodies: HashMap::new(),
        };
        assert!(download_attachment(&source, "missing", "1_x.bin", tmp.path()).is_err());
        assert_eq!(fs::read_dir(tmp.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn failures_keep_attachment_without_local_path() {
        let tmp = tempdir().expect("tempdir");
        let source = MediaOnly {
            bodies: HashMap::from([
                ("ok-1".to_string(), b"one".to_vec()),
                ("ok-2".to_string(), b"two".to_vec()),
            ]),
        };
        let mut messages = vec![
            message(
                "10",
                vec![
                    Attachment::new("a.png", "ok-1"),
                    Attachment::new("gone.png", "dead"),
                ],
            ),
            message("11", vec![]),
            message("12", vec![Attachment::new("a.png", "ok-2")]),
        ];

        let stats = archive_attachments(&source, "5", &mut messages, tmp.path(), 3);
        assert_eq!(
            stats,
            AttachmentStats {
                downloaded: 2,
                failed: 1
            }
        );
        assert_eq!(
            messages[0].attachments[0].local_path.as_deref(),
            Some("attachments/10_a.png")
        );
        assert_eq!(messages[0].attachments[1].local_path, None);
        assert_eq!(messages[0].attachments[1].url, "dead");
        assert_eq!(
            messages[2].attachments[0].local_path.as_deref(),
            Some("attachments/12_a.png")
        );
        assert_eq!(
            fs::read(tmp.path().join("12_a.png")).expect("read"),
            b"two".to_vec()
        );
    }

    #[test]
    fn repeated_names_on_one_message_get_distinct_files() {
        let msg = message(
            "303",
            vec![
                Attachment::new("image.png", "u"),
                Attachment::new("image.png", "u"),
                Attachment::new("a?.png", "u"),
                Attachment::new("a*.png", "u"),
            ],
        );
        assert_eq!(
            plan_file_names(&msg),
            vec!["303_image.png", "303_2_image.png", "303_a_.png", "303_2_a_.png"]
        );
    }

    #[test]
    fn pasted_images_with_one_name_keep_their_own_bytes() {
        let tmp = tempdir().expect("tempdir");
        let source = MediaOnly {
            bodies: HashMap::from([
                ("first".to_string(), b"first-bytes".to_vec()),
                ("second".to_string(), b"second-bytes".to_vec()),
            ]),
        };
        let mut messages = vec![message(
            "303",
            vec![
                Attachment::new("image.png", "first"),
                Attachment::new("image.png", "second"),
            ],
        )];

        let stats = archive_attachments(&source, "5", &mut messages, tmp.path(), 2);
        assert_eq!(stats.downloaded, 2);

        let paths = messages[0]
            .attachments
            .iter()
            .map(|a| a.local_path.clone().expect("local path"))
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["attachments/303_image.png", "attachments/303_2_image.png"]);
        assert_eq!(
            fs::read(tmp.path().join("303_image.png")).expect("first"),
            b"first-bytes".to_vec()
        );
        assert_eq!(
            fs::read(tmp.path().join("303_2_image.png")).expect("second"),
            b"second-bytes".to_vec()
        );
    }

    #[test]
    fn single_worker_processes_everything() {
        let tmp = tempdir().expect("tempdir");
        let source = MediaOnly {
            bodies: HashMap::from([("u".to_string(), b"x".to_vec())]),
        };
        let mut messages = (0..5)
            .map(|i| message(&format!("{i}"), vec![Attachment::new("f.txt", "u")]))
            .collect::<Vec<_>>();
        let stats = archive_attachments(&source, "5", &mut messages, tmp.path(), 1);
        assert_eq!(stats.downloaded, 5);
        assert!(messages.iter().all(|m| m.attachments[0].local_path.is_some()));
    }
}
