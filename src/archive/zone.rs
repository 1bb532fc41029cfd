use anyhow::{Result, anyhow};
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::env;

pub const FILE_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveZone {
    Named(Tz),
    SystemLocal,
}

fn parse_tz(raw: &str) -> Result<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|err| anyhow!("invalid timezone `{}`: {err}", raw.trim()))
}

impl ArchiveZone {
    /// A configured name wins; otherwise the host zone, named through `TZ` when
    /// that variable holds an IANA name.
    pub fn resolve(configured: Option<&str>) -> Result<Self> {
        if let Some(raw) = configured.filter(|v| !v.trim().is_empty()) {
            return Ok(Self::Named(parse_tz(raw)?));
        }
        if let Ok(host) = env::var("TZ")
            && let Ok(tz) = parse_tz(host.trim_start_matches(':'))
        {
            return Ok(Self::Named(tz));
        }
        Ok(Self::SystemLocal)
    }

    pub fn label(&self) -> String {
        match self {
            Self::Named(tz) => tz.name().to_string(),
            Self::SystemLocal => format!("system local (UTC{})", Local::now().format("%:z")),
        }
    }

    pub fn format(&self, at: &DateTime<Utc>, fmt: &str) -> String {
        match self {
            Self::Named(tz) => at.with_timezone(tz).format(fmt).to_string(),
            Self::SystemLocal => at.with_timezone(&Local).format(fmt).to_string(),
        }
    }

    pub fn display(&self, at: &DateTime<Utc>) -> String {
        self.format(at, DISPLAY_FORMAT)
    }

    /// Filesystem-safe stamp shared by the JSON and HTML artifacts.
    pub fn file_stamp(&self, at: &DateTime<Utc>) -> String {
        self.format(at, FILE_STAMP_FORMAT)
    }
}
