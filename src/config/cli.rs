use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "promo-harvest")]
#[command(about = "Harvests promoted videos and comments and extracts advertised domains")]
pub struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit JSON log lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the domains found in a piece of text
    Extract { text: String },

    /// Normalize a single host or URL to its registrable domain
    Normalize { raw: String },

    /// Run one job invocation
    RunJob {
        #[arg(value_enum)]
        job: JobKind,

        /// Stable id of the logical job; re-runs with the same id replay
        /// completed steps.
        #[arg(long)]
        job_id: Option<String>,

        #[arg(long, default_value = "1")]
        attempt: u32,

        /// Event payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Inspect or flip the global kill switch
    KillSwitch {
        #[arg(value_enum)]
        action: KillSwitchAction,

        #[arg(long)]
        reason: Option<String>,

        #[arg(long, default_value = "cli")]
        requested_by: String,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobKind {
    Discovery,
    Harvest,
    Extract,
    /// Check an extracted domain over HTTP
    Enrich,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KillSwitchAction {
    Activate,
    Deactivate,
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_job() {
        let cli = Cli::parse_from([
            "promo-harvest",
            "--config",
            "harvest.toml",
            "run-job",
            "harvest",
            "--job-id",
            "job-7",
            "--attempt",
            "2",
            "--payload",
            r#"{"videoId":"v1"}"#,
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("harvest.toml")));
        match cli.command {
            Command::RunJob {
                job,
                job_id,
                attempt,
                payload,
            } => {
                assert_eq!(job, JobKind::Harvest);
                assert_eq!(job_id.as_deref(), Some("job-7"));
                assert_eq!(attempt, 2);
                assert!(payload.contains("v1"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_enrich_job() {
        let cli = Cli::parse_from([
            "promo-harvest",
            "run-job",
            "enrich",
            "--payload",
            r#"{"domain":"shop.com"}"#,
        ]);
        assert!(matches!(cli.command, Command::RunJob { job: JobKind::Enrich, .. }));
    }

    #[test]
    fn test_parse_kill_switch_with_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "promo-harvest",
            "kill-switch",
            "activate",
            "--reason",
            "upstream incident",
            "--verbose",
        ]);

        assert!(cli.verbose);
        match cli.command {
            Command::KillSwitch {
                action,
                reason,
                requested_by,
            } => {
                assert_eq!(action, KillSwitchAction::Activate);
                assert_eq!(reason.as_deref(), Some("upstream incident"));
                assert_eq!(requested_by, "cli");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_job_is_rejected() {
        assert!(Cli::try_parse_from(["promo-harvest", "run-job", "enrich"]).is_err());
    }
}
