use anyhow::{Context, Result};
use std::path::Path;

use crate::archive::audit;
use crate::archive::config::{ChanlogConfig, load_config};
use crate::archive::document::DocumentHeader;
use crate::archive::lock::ChannelLocks;
use crate::archive::pipeline::{ArchiveOutcome, ArchiveRequest, RunSettings, run_archive};
use crate::archive::warn::{self, WarnEvent};
use crate::commands::CommandReport;
use crate::discord::client::DiscordSession;
use crate::error::ArchiveError;

/// Reply shown for any failed run; details go to the warning and audit logs.
pub const FAILURE_REPLY: &str = "An error occurred while logging messages.";

#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub user_id: Option<String>,
}

fn error_code(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ArchiveError>())
        .map(ArchiveError::code)
        .unwrap_or("ARCHIVE_FAILED")
}

fn report_failure(
    report: &mut CommandReport,
    logs_dir: Option<&Path>,
    channel_id: &str,
    err: &anyhow::Error,
) {
    let detail = format!("{err:#}");
    warn::emit(WarnEvent {
        code: error_code(err),
        stage: "archive",
        action: "run",
        channel: channel_id,
        message: "",
        target: &logs_dir.map(|p| p.display().to_string()).unwrap_or_default(),
        reason: "run-aborted",
        err: &detail,
    });
    if let Some(logs_dir) = logs_dir {
        audit::record(
            logs_dir,
            "archive",
            "failed",
            &format!("channel={channel_id} err={detail}"),
        );
    }
    report.issue(FAILURE_REPLY);
}

pub fn run(opts: &ArchiveOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("archive");

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            report_failure(&mut report, None, &opts.channel_id, &err);
            return Ok(report);
        }
    };
    let logs_dir = cfg.archive.logs_dir.clone();

    audit::record(
        &logs_dir,
        "archive",
        "started",
        &format!(
            "channel={} user={}",
            opts.channel_id,
            opts.user_id.as_deref().unwrap_or("*")
        ),
    );

    match archive_channel(&cfg, opts) {
        Ok(outcome) => {
            report.detail(outcome.reply());
            report.detail(format!("channel_dir={}", outcome.channel_dir.display()));
            report.detail(format!("pages={}", outcome.pages));
            report.detail(format!("raw_messages={}", outcome.raw_messages));
            report.detail(format!(
                "attachments.downloaded={}",
                outcome.attachments.downloaded
            ));
            report.detail(format!("attachments.failed={}", outcome.attachments.failed));
            audit::record(
                &logs_dir,
                "archive",
                "completed",
                &format!(
                    "channel={} messages={} record={}",
                    opts.channel_id,
                    outcome.message_count,
                    outcome.documents.json_path.display()
                ),
            );
        }
        Err(err) => report_failure(&mut report, Some(&logs_dir), &opts.channel_id, &err),
    }

    Ok(report)
}

fn archive_channel(cfg: &ChanlogConfig, opts: &ArchiveOptions) -> Result<ArchiveOutcome> {
    if ChannelLocks::process().is_held(&opts.channel_id) {
        return Err(ArchiveError::ChannelBusy(opts.channel_id.clone()).into());
    }
    let token = cfg.require_token()?;
    let session = DiscordSession::connect(&cfg.discord, token)?;
    audit::record(
        &cfg.archive.logs_dir,
        "session",
        "connected",
        &format!("bot={} id={}", session.bot_name(), session.bot_id()),
    );

    let result = archive_with_session(&session, cfg, opts);

    let closed = session.close();
    audit::record(&cfg.archive.logs_dir, "session", "closed", &format!("bot={closed}"));
    result
}

fn archive_with_session(
    session: &DiscordSession,
    cfg: &ChanlogConfig,
    opts: &ArchiveOptions,
) -> Result<ArchiveOutcome> {
    let channel = session.channel(&opts.channel_id)?;
    let guild_id = opts
        .guild_id
        .clone()
        .or_else(|| channel.guild_id.clone())
        .with_context(|| format!("channel {} has no guild; pass --guild", channel.id))?;
    let guild_name = session.guild_name(&guild_id)?;
    let filtered_for = match opts.user_id.as_deref() {
        Some(user_id) => Some(session.user_display_name(user_id)?),
        None => None,
    };

    let settings = RunSettings {
        logs_dir: cfg.archive.logs_dir.clone(),
        zone: cfg.zone()?,
        attachment_workers: cfg.archive.attachment_workers,
    };
    let request = ArchiveRequest {
        guild_id,
        channel_id: channel.id.clone(),
        author_filter: opts.user_id.clone(),
    };
    let header = DocumentHeader {
        guild_name,
        channel_name: channel.name,
        filtered_for,
    };

    run_archive(session, ChannelLocks::process(), &settings, &request, &header)
}
