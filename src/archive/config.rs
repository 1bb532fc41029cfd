use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::archive::zone::ArchiveZone;
use crate::error::ArchiveError;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub bot_token: Option<String>,
    pub api_base: String,
    pub request_timeout_secs: u64,
    pub attachment_timeout_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: 30,
            attachment_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub logs_dir: PathBuf,
    pub timezone: Option<String>,
    pub attachment_workers: usize,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            timezone: None,
            attachment_workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChanlogConfig {
    pub discord: DiscordConfig,
    pub archive: ArchiveSettings,
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl ChanlogConfig {
    pub fn zone(&self) -> Result<ArchiveZone> {
        ArchiveZone::resolve(self.archive.timezone.as_deref())
    }

    pub fn require_token(&self) -> Result<&str> {
        self.discord
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ArchiveError::Config(
                    "bot token missing: set CHANLOG_BOT_TOKEN or discord.bot_token".to_string(),
                )
                .into()
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialChanlogConfig {
    bot_token: Option<String>,
    timezone: Option<String>,
    discord: Option<DiscordConfig>,
    archive: Option<ArchiveSettings>,
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn invalid(reason: &str) -> anyhow::Error {
    ArchiveError::Config(reason.to_string()).into()
}

fn validate(cfg: &ChanlogConfig) -> Result<()> {
    if cfg.archive.attachment_workers == 0 {
        return Err(invalid("attachment workers must be >= 1"));
    }
    if cfg.discord.request_timeout_secs == 0 {
        return Err(invalid("request timeout must be >= 1 second"));
    }
    if cfg.discord.attachment_timeout_secs == 0 {
        return Err(invalid("attachment timeout must be >= 1 second"));
    }
    if cfg.discord.api_base.trim().is_empty() {
        return Err(invalid("api base cannot be empty"));
    }
    if cfg.archive.logs_dir.as_os_str().is_empty() {
        return Err(invalid("logs dir cannot be empty"));
    }
    cfg.zone().map_err(|err| invalid(&format!("{err:#}")))?;
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Some(custom) = env_non_empty("CHANLOG_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }

    let local = PathBuf::from("config.toml");
    if local.is_file() {
        return Some(local);
    }

    let home = dirs::home_dir()?;
    Some(home.join(".config").join("chanlog").join("config.toml"))
}

fn merge_file_config(base: &mut ChanlogConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| invalid(&format!("failed to read {}: {err}", path.display())))?;
    let parsed: PartialChanlogConfig = toml::from_str(&raw)
        .map_err(|err| invalid(&format!("failed to parse {}: {err}", path.display())))?;
    if let Some(discord) = parsed.discord {
        base.discord = discord;
    }
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    // Flat files carry the two most common keys at the top level.
    if let Some(token) = parsed.bot_token {
        base.discord.bot_token = Some(token);
    }
    if let Some(timezone) = parsed.timezone {
        base.archive.timezone = Some(timezone);
    }
    base.source_path = Some(path);
    Ok(())
}

pub fn load_config() -> Result<ChanlogConfig> {
    let mut cfg = ChanlogConfig::default();
    merge_file_config(&mut cfg)?;

    if let Some(token) = env_non_empty("CHANLOG_BOT_TOKEN").or_else(|| env_non_empty("BOT_TOKEN"))
    {
        cfg.discord.bot_token = Some(token);
    }
    if let Some(api_base) = env_non_empty("CHANLOG_API_BASE") {
        cfg.discord.api_base = api_base;
    }
    cfg.discord.request_timeout_secs = env_or_u64(
        "CHANLOG_REQUEST_TIMEOUT_SECS",
        cfg.discord.request_timeout_secs,
    );
    cfg.discord.attachment_timeout_secs = env_or_u64(
        "CHANLOG_ATTACHMENT_TIMEOUT_SECS",
        cfg.discord.attachment_timeout_secs,
    );
    if let Some(logs_dir) = env_non_empty("CHANLOG_LOGS_DIR") {
        cfg.archive.logs_dir = PathBuf::from(logs_dir);
    }
    if let Some(timezone) = env_non_empty("CHANLOG_TIMEZONE") {
        cfg.archive.timezone = Some(timezone);
    }
    cfg.archive.attachment_workers = env_or_usize(
        "CHANLOG_ATTACHMENT_WORKERS",
        cfg.archive.attachment_workers,
    );

    validate(&cfg)?;
    Ok(cfg)
}
