use anyhow::Result;
use std::env;

use crate::archive::audit;
use crate::archive::config::{ChanlogConfig, load_config};
use crate::commands::CommandReport;

include!(concat!(env!("OUT_DIR"), "/chanlog_env_allowlist.rs"));

fn env_overrides() -> Vec<String> {
    GENERATED_CHANLOG_ENV_ALLOWLIST
        .iter()
        .filter(|key| env::var(key).is_ok_and(|v| !v.trim().is_empty()))
        .map(|key| key.to_string())
        .collect()
}

fn describe(report: &mut CommandReport, cfg: &ChanlogConfig) {
    let config_path = cfg
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<defaults>".to_string());
    report.detail(format!("config_path={config_path}"));
    report.detail(format!("api_base={}", cfg.discord.api_base));
    report.detail(format!(
        "request_timeout_secs={}",
        cfg.discord.request_timeout_secs
    ));
    report.detail(format!(
        "attachment_timeout_secs={}",
        cfg.discord.attachment_timeout_secs
    ));
    report.detail(format!("logs_dir={}", cfg.archive.logs_dir.display()));
    report.detail(format!(
        "audit_log={}",
        audit::audit_path(&cfg.archive.logs_dir).display()
    ));
    report.detail(format!(
        "attachment_workers={}",
        cfg.archive.attachment_workers
    ));
    match cfg.zone() {
        Ok(zone) => report.detail(format!("timezone={}", zone.label())),
        Err(err) => report.issue(format!("{err:#}")),
    }

    let token_set = cfg.require_token().is_ok();
    report.detail(format!(
        "bot_token={}",
        if token_set { "set" } else { "missing" }
    ));
    if !token_set {
        report.issue("bot token missing: set CHANLOG_BOT_TOKEN or discord.bot_token");
    }
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    report.detail(format!("build_id={}", env!("BUILD_UUID")));

    let overrides = env_overrides();
    report.detail(format!(
        "env_overrides={}",
        if overrides.is_empty() {
            "none".to_string()
        } else {
            overrides.join(",")
        }
    ));

    match load_config() {
        Ok(cfg) => describe(&mut report, &cfg),
        Err(err) => report.issue(format!("{err:#}")),
    }

    Ok(report)
}
