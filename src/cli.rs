use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::commands::archive::ArchiveOptions;

#[derive(Parser, Debug)]
#[command(name = "chanlog")]
#[command(version, about = "Archive chat channel history to JSON and HTML")]
struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive one channel's full history
    Archive {
        /// Channel to archive
        #[arg(long)]
        channel: String,

        /// Guild the channel belongs to (looked up when omitted)
        #[arg(long)]
        guild: Option<String>,

        /// Keep only messages written by this user id
        #[arg(long)]
        user: Option<String>,
    },

    /// Show resolved configuration
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Archive {
            channel,
            guild,
            user,
        } => commands::archive::run(&ArchiveOptions {
            channel_id: channel,
            guild_id: guild,
            user_id: user,
        })?,
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}
