// mc3d CLI - curate and reconcile crystal-structure imports round by round

mod analyse;
mod curate;
mod exit_codes;
mod status;
mod uniq;
mod update;
mod util;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use analyse::AnalyseCommands;
use exit_codes::{recon_exit_code, EXIT_ERROR, EXIT_INVALID_CONFIG, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "mc3d")]
#[command(about = "Curate, reconcile and group crystal-structure imports")]
#[command(version)]
struct Cli {
    /// Store directory (default: $MC3D_STORE or the platform data dir)
    #[arg(long, global = true, env = "MC3D_STORE")]
    store: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Curate a cleaned raw import and store it as a round
    #[command(after_help = "\
Examples:
  mc3d curate cleaned-v2.json --round v2
  mc3d curate cleaned-v2.json --round v2 --config cod.toml --json")]
    Curate {
        /// JSON array of cleaned entries
        input: PathBuf,

        /// Round tag to store the import under
        #[arg(long)]
        round: String,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,
    },

    /// Reconcile a curated round against the previous final set
    #[command(after_help = "\
Examples:
  mc3d update --round v1
  mc3d update --previous v1 --round v2
  mc3d update --previous v1 --round v2 --json --output update-v2.json")]
    Update {
        /// Round whose final set is the baseline (omit for the first round)
        #[arg(long)]
        previous: Option<String>,

        /// Round to reconcile
        #[arg(long)]
        round: String,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file (default: `[output] json` from the config)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Inspect stored state
    #[command(subcommand)]
    Analyse(AnalyseCommands),

    /// Group a round's final set into structure families
    #[command(after_help = "\
Examples:
  mc3d uniq --round v2 --output families.json
  mc3d uniq --round v2 --json")]
    Uniq {
        /// Round whose final set is grouped
        #[arg(long)]
        round: String,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the family map to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Output the family map to stdout
        #[arg(long)]
        json: bool,
    },

    /// Roll up family status from member deprecation reasons
    #[command(after_help = "\
Examples:
  mc3d status families.json
  mc3d status families.json --json
  mc3d status families.json --csv status.csv")]
    Status {
        /// Family map (group ID -> member source keys)
        families: PathBuf,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Export one row per family to CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Validate a config file without running anything
    #[command(after_help = "\
Examples:
  mc3d validate cod.toml")]
    Validate {
        /// TOML config file
        config: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = cli.store;
    let result = match cli.command {
        Commands::Curate { input, round, config, json } => {
            curate::cmd_curate(store, input, round, config, json)
        }
        Commands::Update { previous, round, config, json, output } => {
            update::cmd_update(store, previous, round, config, json, output)
        }
        Commands::Analyse(cmd) => analyse::cmd_analyse(store, cmd),
        Commands::Uniq { round, config, output, json } => {
            uniq::cmd_uniq(store, round, config, output, json)
        }
        Commands::Status { families, json, csv } => status::cmd_status(store, families, json, csv),
        Commands::Validate { config } => cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<mc3d_recon::ReconError> for CliError {
    fn from(err: mc3d_recon::ReconError) -> Self {
        use mc3d_recon::ReconError;
        let hint = match &err {
            ReconError::MissingRound(round) => {
                Some(format!("run `mc3d curate <file> --round {round}` first"))
            }
            ReconError::UncommittedRound(round) => Some(format!(
                "rerun `mc3d update --round {round}` (with its --previous) until it commits"
            )),
            ReconError::AppendOnly(_) => {
                Some("stored records are never overwritten; import under a new round".to_string())
            }
            ReconError::UnknownDatabase(_) => {
                Some("add the name to the [databases] table of the config".to_string())
            }
            _ => None,
        };
        Self { code: recon_exit_code(&err), message: err.to_string(), hint }
    }
}

// ============================================================================
// validate
// ============================================================================

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config_str = std::fs::read_to_string(&config_path).map_err(|e| {
        CliError::args(format!("cannot read {}: {e}", config_path.display()))
    })?;

    match mc3d_recon::ReconConfig::from_toml(&config_str) {
        Ok(config) => {
            eprintln!(
                "valid: '{}' for database '{}' ({} source name(s), {} formula-mismatch code(s))",
                config.name,
                config.database,
                config.databases.len(),
                config.curation.formula_mismatch.len(),
            );
            Ok(())
        }
        Err(e) => Err(CliError::new(EXIT_INVALID_CONFIG, e.to_string())),
    }
}
