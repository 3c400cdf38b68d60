#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use reportdesk_client_core::{ClientConfig, JobType};

mod commands;
mod context;
mod delivery;

pub use context::{CliContext, init_tracing, resolve_state_dir};
pub use delivery::SaveToDirectory;

#[derive(Parser, Debug)]
#[command(name = "reportdesk")]
#[command(about = "Request, track, and download ReportDesk reports")]
pub struct ReportDeskCli {
    /// Report service base URL (overrides REPORTDESK_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Directory holding the persisted session (overrides REPORTDESK_STATE_DIR)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the report service is reachable
    Health,
    /// Email a one-time login link
    Login { email: String },
    /// Exchange a login link (or its bare token) for a session
    Verify { link: String },
    /// Re-check access for the stored session and print capabilities
    Access,
    /// Forget the stored session and preferences
    Logout,
    /// Persisted preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommand,
    },
    /// Create, watch, and inspect report jobs
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },
    /// Review queue operations for admin accounts
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum PrefsCommand {
    /// Download delivered reports automatically
    AutoDeliver {
        #[arg(value_enum)]
        value: Toggle,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
pub enum JobCommand {
    /// Create a job, upload files, submit it, and poll until it settles
    Run(JobRunArgs),
    /// Poll an existing job until it settles
    Watch {
        job_id: String,
        /// Directory to save the delivered report into
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print a job's current status and upload checklist
    Status { job_id: String },
}

#[derive(Args, Debug)]
pub struct JobRunArgs {
    /// sector_report, company_analysis, or strategic_master_plan
    #[arg(long = "type")]
    pub job_type: JobType,
    /// Job input as key=value (repeatable)
    #[arg(long = "input", value_parser = parse_key_value)]
    pub inputs: Vec<(String, String)>,
    /// File to upload as file_set=path (repeatable)
    #[arg(long = "file", value_parser = parse_key_value)]
    pub files: Vec<(String, String)>,
    /// Directory to save the delivered report into
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Stop after submitting instead of polling
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Approve a job waiting for review
    Approve { job_id: String },
    /// List jobs waiting for review
    Queue,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

pub async fn run() -> anyhow::Result<()> {
    let cli = ReportDeskCli::parse();
    let mut config = ClientConfig::from_env().context("invalid REPORTDESK_* configuration")?;
    if let Some(base_url) = cli.base_url.as_deref() {
        config = config.with_base_url(base_url)?;
    }
    init_tracing(&config.log_filter);

    let ctx = CliContext::load(config, cli.state_dir.as_deref())?;
    match cli.command {
        Commands::Health => commands::health(&ctx).await,
        Commands::Login { email } => commands::login(&ctx, &email).await,
        Commands::Verify { link } => commands::verify(&ctx, &link).await,
        Commands::Access => commands::access(&ctx).await,
        Commands::Logout => {
            commands::logout(&ctx);
            Ok(())
        }
        Commands::Prefs { command } => {
            commands::prefs(&ctx, command);
            Ok(())
        }
        Commands::Job { command } => commands::job(&ctx, command).await,
        Commands::Admin { command } => commands::admin(&ctx, command).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use clap::error::ErrorKind;

    use super::*;

    #[test]
    fn cli_requires_subcommand() {
        let err = match ReportDeskCli::try_parse_from(["reportdesk"]) {
            Ok(_) => panic!("expected missing subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        let err = match ReportDeskCli::try_parse_from(["reportdesk", "unknown-subcommand"]) {
            Ok(_) => panic!("expected invalid subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn job_run_collects_repeated_inputs_and_files() {
        let cli = ReportDeskCli::try_parse_from([
            "reportdesk",
            "job",
            "run",
            "--type",
            "sector-report",
            "--input",
            "sector=retail",
            "--input",
            "country = TR",
            "--file",
            "financials=./fy.pdf",
            "--out",
            "reports",
            "--base-url",
            "http://localhost:9000",
        ])
        .expect("job run parses");

        assert_eq!(cli.base_url.as_deref(), Some("http://localhost:9000"));
        let Commands::Job {
            command: JobCommand::Run(args),
        } = cli.command
        else {
            panic!("expected job run");
        };
        assert_eq!(args.job_type, JobType::SectorReport);
        assert_eq!(
            args.inputs,
            vec![
                ("sector".to_string(), "retail".to_string()),
                ("country".to_string(), "TR".to_string()),
            ]
        );
        assert_eq!(
            args.files,
            vec![("financials".to_string(), "./fy.pdf".to_string())]
        );
        assert_eq!(args.out, Some(PathBuf::from("reports")));
        assert!(!args.no_wait);
    }

    #[test]
    fn job_run_rejects_malformed_pairs_and_types() {
        let err = ReportDeskCli::try_parse_from([
            "reportdesk", "job", "run", "--type", "sector", "--input", "no-equals",
        ])
        .expect_err("input without '='");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let err = ReportDeskCli::try_parse_from(["reportdesk", "job", "run", "--type", "poem"])
            .expect_err("unknown job type");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn prefs_toggle_accepts_on_and_off() {
        let cli = ReportDeskCli::try_parse_from(["reportdesk", "prefs", "auto-deliver", "off"])
            .expect("prefs parses");
        assert!(matches!(
            cli.command,
            Commands::Prefs {
                command: PrefsCommand::AutoDeliver { value: Toggle::Off }
            }
        ));

        let err = ReportDeskCli::try_parse_from(["reportdesk", "prefs", "auto-deliver", "maybe"])
            .expect_err("invalid toggle");
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn key_value_parser_trims_and_requires_key() {
        assert_eq!(
            parse_key_value(" notes = q3 draft "),
            Ok(("notes".to_string(), "q3 draft".to_string()))
        );
        assert!(parse_key_value("=value").is_err());
        assert_eq!(
            parse_key_value("filter=a=b"),
            Ok(("filter".to_string(), "a=b".to_string()))
        );
    }
}
