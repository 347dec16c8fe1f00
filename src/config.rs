//! Configuration for exchange-reconcile
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::dedup::TieBreak;
use crate::error::{ReconcileError, Result};
use crate::executor::{ExecutorConfig, MAX_CHUNK_SIZE};
use crate::passes::{PassSettings, MAX_DATE_WINDOW_DAYS};
use crate::store::HttpStoreConfig;

/// Reconcile and migrate exchange-program records in the hosted store
#[derive(Parser, Debug, Clone)]
#[command(name = "exchange-reconcile")]
#[command(about = "Detect and repair duplicate, orphaned and inconsistent records")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Store connection
    #[command(flatten)]
    pub store: StoreArgs,

    /// Run against a JSON snapshot instead of the live store
    #[arg(long, env = "SNAPSHOT", global = true)]
    pub snapshot: Option<PathBuf>,

    /// Save the mutated snapshot back to its file after the run
    #[arg(long, global = true, default_value = "false")]
    pub write_back: bool,

    /// Operations per transaction (1-50)
    #[arg(long, env = "CHUNK_SIZE", default_value = "25", global = true)]
    pub chunk_size: usize,

    /// Pause between chunks in milliseconds
    #[arg(long, env = "CHUNK_DELAY_MS", default_value = "1000", global = true)]
    pub chunk_delay_ms: u64,

    /// Records listed per pass before applying
    #[arg(long, env = "SAMPLE_LIMIT", default_value = "10", global = true)]
    pub sample_limit: usize,

    /// Print the plan without writing anything
    #[arg(long, env = "DRY_RUN", default_value = "false", global = true)]
    pub dry_run: bool,

    /// What to do with placeholder reviewers
    #[arg(long, env = "REVIEWER_POLICY", value_enum, default_value = "derive", global = true)]
    pub reviewer_policy: RepairPolicy,

    /// Reviewers eligible to replace a placeholder, comma separated
    #[arg(
        long,
        env = "REVIEWER_ROSTER",
        value_delimiter = ',',
        default_values = ["Sarah Mitchell", "David Okafor", "Lena Berg"],
        global = true
    )]
    pub reviewer_roster: Vec<String>,

    /// What to do with missing review dates
    #[arg(long, env = "DATE_POLICY", value_enum, default_value = "derive", global = true)]
    pub date_policy: RepairPolicy,

    /// Days before the last update a derived review date may fall
    #[arg(long, env = "DATE_WINDOW_DAYS", default_value = "30", global = true)]
    pub date_window_days: i64,

    /// Which duplicate survives when none or all are linked
    #[arg(long, env = "TIE_BREAK", value_enum, default_value = "newest", global = true)]
    pub tie_break: TieBreakArg,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StoreArgs {
    /// Store application id
    #[arg(long, env = "STORE_APP_ID", global = true)]
    pub app_id: Option<String>,

    /// Store admin token
    #[arg(long, env = "STORE_ADMIN_TOKEN", hide_env_values = true, global = true)]
    pub admin_token: Option<String>,

    /// Store API base URL
    #[arg(long, env = "STORE_API_URL", default_value = "https://api.instantdb.com", global = true)]
    pub api_url: String,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000", global = true)]
    pub request_timeout_ms: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Remove duplicate user accounts
    DuplicateUsers {
        /// Only consider users with this role (e.g. student)
        #[arg(long)]
        role: Option<String>,
    },
    /// Remove extra profiles owned by the same user
    DuplicateProfiles,
    /// Remove profiles whose user no longer exists
    OrphanProfiles,
    /// Report dangling references and profile/role mismatches
    CheckReferences,
    /// Repair approval metadata on profiles
    FixApprovals,
    /// Repair review metadata on change-queue items
    FixChangeQueue,
    /// Split embedded application data into applications
    MigrateComprehensive,
    /// Run every pass in dependency order
    All,
    /// Dump every collection of the live store to a JSON snapshot
    ExportSnapshot {
        /// Output file
        path: PathBuf,
    },
}

/// Derive a value automatically or leave the record for a person
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPolicy {
    Derive,
    Flag,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakArg {
    /// Most recently updated survives
    Newest,
    /// Earliest created survives
    Oldest,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Args {
    /// Whether a live store connection is needed
    pub fn needs_live_store(&self) -> bool {
        self.snapshot.is_none() || matches!(self.command, Command::ExportSnapshot { .. })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.needs_live_store() {
            if self.store.app_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
                return Err(ReconcileError::Config("STORE_APP_ID is required".to_string()));
            }
            if self.store.admin_token.as_deref().map_or(true, |s| s.trim().is_empty()) {
                return Err(ReconcileError::Config("STORE_ADMIN_TOKEN is required".to_string()));
            }
        }

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ReconcileError::Config(format!(
                "CHUNK_SIZE must be between 1 and {}",
                MAX_CHUNK_SIZE
            )));
        }

        if self.write_back && self.snapshot.is_none() {
            return Err(ReconcileError::Config("--write-back requires --snapshot".to_string()));
        }

        if matches!(self.command, Command::ExportSnapshot { .. }) && self.snapshot.is_some() {
            return Err(ReconcileError::Config(
                "export-snapshot reads the live store; drop --snapshot".to_string(),
            ));
        }

        if !(0..=MAX_DATE_WINDOW_DAYS).contains(&self.date_window_days) {
            return Err(ReconcileError::Config(format!(
                "DATE_WINDOW_DAYS must be between 0 and {}",
                MAX_DATE_WINDOW_DAYS
            )));
        }

        if self.reviewer_policy == RepairPolicy::Derive
            && self.reviewer_roster.iter().all(|name| name.trim().is_empty())
        {
            return Err(ReconcileError::Config("REVIEWER_ROSTER is empty".to_string()));
        }

        Ok(())
    }

    pub fn http_store_config(&self) -> HttpStoreConfig {
        HttpStoreConfig {
            base_url: self.store.api_url.clone(),
            app_id: self.store.app_id.clone().unwrap_or_default(),
            admin_token: self.store.admin_token.clone().unwrap_or_default(),
            timeout: Duration::from_millis(self.store.request_timeout_ms),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            chunk_size: self.chunk_size,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            dry_run: self.dry_run,
        }
    }

    pub fn pass_settings(&self) -> PassSettings {
        PassSettings {
            reviewer_policy: self.reviewer_policy,
            reviewer_roster: self.reviewer_roster.clone(),
            date_policy: self.date_policy,
            date_window_days: self.date_window_days,
            tie_break: match self.tie_break {
                TieBreakArg::Newest => TieBreak::MostRecentlyUpdated,
                TieBreakArg::Oldest => TieBreak::EarliestCreated,
            },
            user_role: match &self.command {
                Command::DuplicateUsers { role } => role.clone(),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("exchange-reconcile").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_live_store_requires_credentials() {
        let args = parse(&["fix-approvals"]);
        let args = Args {
            store: StoreArgs {
                app_id: None,
                admin_token: None,
                ..args.store
            },
            ..args
        };
        assert!(matches!(args.validate(), Err(ReconcileError::Config(_))));
    }

    #[test]
    fn test_snapshot_mode_needs_no_credentials() {
        let args = parse(&["--snapshot", "state.json", "all"]);
        let args = Args {
            store: StoreArgs {
                app_id: None,
                admin_token: None,
                ..args.store
            },
            ..args
        };
        assert!(args.validate().is_ok());
        assert!(!args.needs_live_store());
    }

    #[test]
    fn test_chunk_size_bounds() {
        let args = parse(&["--snapshot", "s.json", "--chunk-size", "51", "all"]);
        assert!(args.validate().is_err());

        let args = parse(&["--snapshot", "s.json", "--chunk-size", "50", "all"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_date_window_bounds() {
        let args = parse(&["--snapshot", "s.json", "--date-window-days", "1000000000", "all"]);
        assert!(matches!(args.validate(), Err(ReconcileError::Config(_))));

        let args = parse(&["--snapshot", "s.json", "--date-window-days", "3650", "all"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_roster_and_role() {
        let args = parse(&[
            "--snapshot",
            "s.json",
            "--reviewer-roster",
            "Ana Silva,Tom Berg",
            "duplicate-users",
            "--role",
            "student",
        ]);
        let settings = args.pass_settings();
        assert_eq!(settings.reviewer_roster, vec!["Ana Silva", "Tom Berg"]);
        assert_eq!(settings.user_role.as_deref(), Some("student"));
    }
}
