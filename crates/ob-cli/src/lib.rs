pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ob_core::{CoreError, ParseMode, Reporter};
use ob_fs::{load_config, resolve_settings, ExportFormat, MergeOutcome, SettingsOverrides};
use ob_vault::{OnePasswordCli, SyncOutcome};

pub use sync::{sync_collection, SyncRequest, SyncSummary, VaultMode};

/// Exit status used for every failed run.
pub const FAILURE_EXIT_CODE: u8 = 2;

#[derive(Parser)]
#[command(
    name = "op-bruno",
    version,
    about = "Move Bruno collection secrets into 1Password"
)]
struct Cli {
    /// Show debug logs on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract secrets from the environments and wire them to 1Password.
    Sync {
        /// Path to the Bruno collection directory.
        collection: PathBuf,
        /// 1Password vault name.
        #[arg(long)]
        vault: Option<String>,
        /// 1Password item title. Defaults to the collection name.
        #[arg(long)]
        title: Option<String>,
        /// Name of the secrets file written in the collection directory.
        #[arg(long)]
        out_name: Option<String>,
        /// Create or update the 1Password item.
        #[arg(long = "1password")]
        one_password: bool,
        /// Only check that the vault is reachable.
        #[arg(long, conflicts_with = "one_password")]
        verify_vault: bool,
        /// Close unterminated environment blocks instead of failing.
        #[arg(long)]
        lenient: bool,
    },
}

/// Prints info on stdout, warnings and errors on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalReporter;

impl Reporter for TerminalReporter {
    fn info(&self, message: &str) {
        println!("{message}");
    }

    fn warn(&self, message: &str) {
        eprintln!("warning: {message}");
    }

    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Sync {
            collection,
            vault,
            title,
            out_name,
            one_password,
            verify_vault,
            lenient,
        } => {
            let config = load_config().context("failed to load op-bruno config")?;
            let overrides = SettingsOverrides {
                vault,
                out_name,
                parse_mode: lenient.then_some(ParseMode::Lenient),
            };
            let settings = resolve_settings(overrides, config, |key| std::env::var(key).ok());
            let vault_mode = if one_password {
                VaultMode::Upsert
            } else if verify_vault {
                VaultMode::Verify
            } else {
                VaultMode::Skip
            };
            let request = SyncRequest {
                collection,
                title,
                settings,
                vault_mode,
            };

            let reporter = TerminalReporter;
            if let Some(summary) = sync_collection(&request, &OnePasswordCli::new(), &reporter)? {
                for line in summary_lines(&summary) {
                    reporter.info(&line);
                }
            }
            Ok(())
        }
    }
}

/// Print a failed run's error chain and the matching suggestions to stderr.
pub fn report_failure(err: &anyhow::Error) {
    let reporter = TerminalReporter;
    reporter.error(&format!("{err:#}"));
    if let Some(core) = err.chain().find_map(|cause| cause.downcast_ref::<CoreError>()) {
        for suggestion in core.suggestions() {
            eprintln!("  - {suggestion}");
        }
    }
}

fn summary_lines(summary: &SyncSummary) -> Vec<String> {
    let format = match summary.export_format {
        ExportFormat::Json => "JSON",
        ExportFormat::Yaml => "YAML",
    };
    let vault = match &summary.vault {
        None => "not synced".to_string(),
        Some(SyncOutcome::Created { fields, .. }) => format!("created with {fields} field(s)"),
        Some(SyncOutcome::Updated { added, .. }) => format!("{} field(s) added", added.len()),
        Some(SyncOutcome::Unchanged { .. }) => "up to date".to_string(),
    };
    let script = match summary.collection {
        MergeOutcome::Created => "created",
        MergeOutcome::Added => "added",
        MergeOutcome::Prepended => "prepended to the existing script",
        MergeOutcome::Replaced => "refreshed",
    };

    vec![
        String::new(),
        format!("Item:          {}", summary.title),
        format!(
            "Secrets:       {} in {} environment(s)",
            summary.secrets, summary.environments
        ),
        format!("Secrets file:  {} ({format})", summary.export_path.display()),
        format!(
            "bruno.json:    {}",
            if summary.config_patched { "patched" } else { "unchanged" }
        ),
        format!("1Password:     {vault}"),
        format!("Script:        {script}"),
    ]
}
