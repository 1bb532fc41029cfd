use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("rate limited on {endpoint}; retry after {retry_after_secs:.1}s")]
    RateLimited {
        endpoint: String,
        retry_after_secs: f64,
    },
    #[error("not authorized for {endpoint} (status {status})")]
    Unauthorized { endpoint: String, status: u16 },
    #[error("{endpoint} returned status {status}")]
    HttpStatus { endpoint: String, status: u16 },
    #[error("storage failure at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("channel {0} is already being archived")]
    ChannelBusy(String),
    #[error("history cursor did not advance past message {0}")]
    StalledCursor(String),
    #[error("config invalid: {0}")]
    Config(String),
}

impl ArchiveError {
    pub fn storage(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.display().to_string(),
            source,
        }
    }

    /// Short stable code used in warning lines and the audit log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::HttpStatus { .. } => "HTTP_STATUS",
            Self::Storage { .. } => "STORAGE",
            Self::ChannelBusy(_) => "CHANNEL_BUSY",
            Self::StalledCursor(_) => "STALLED_CURSOR",
            Self::Config(_) => "CONFIG",
        }
    }
}
