mod commands;
mod keygen;
mod scenario;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Which wire document `r7 hash` should read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum DocumentKind {
    /// Detect from the document's fields
    Auto,
    Record,
    Rules,
    /// Any JSON value, hashed canonically
    Json,
}

/// R7 action engine tools.
#[derive(Parser)]
#[command(name = "r7", version, about = "R7 action engine tools")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical content hash of an Action Record, Rule Set or JSON document
    Hash {
        /// Path to the JSON document
        file: PathBuf,
        #[arg(long, default_value = "auto", value_enum)]
        kind: DocumentKind,
    },

    /// Load and validate an engine configuration file (TOML)
    CheckConfig {
        /// Path to the configuration file
        file: PathBuf,
    },

    /// Generate an Ed25519 witness keypair
    Keygen {
        /// Signing algorithm (only ed25519 is supported)
        #[arg(long, default_value = "ed25519")]
        algorithm: String,
        /// Output file prefix (creates <prefix>.secret and <prefix>.pub)
        #[arg(long, default_value = "r7-witness")]
        prefix: String,
    },

    /// Run a scenario of actions through an in-memory engine
    Simulate {
        /// Path to the scenario JSON file
        scenario: PathBuf,
        /// Engine configuration (TOML); overrides the scenario's `config`
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "r7=warn" } else { "r7=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match cli.command {
        Commands::Hash { file, kind } => {
            commands::hash::cmd_hash(&file, kind, cli.output, cli.quiet);
        }
        Commands::CheckConfig { file } => {
            commands::check_config::cmd_check_config(&file, cli.output, cli.quiet);
        }
        Commands::Keygen { algorithm, prefix } => {
            keygen::cmd_keygen(&algorithm, &prefix);
        }
        Commands::Simulate { scenario, config } => {
            commands::simulate::cmd_simulate(&scenario, config.as_deref(), cli.output, cli.quiet);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Read and parse a JSON file, exiting with a reported error on failure.
pub(crate) fn read_json(path: &std::path::Path, output: OutputFormat, quiet: bool) -> serde_json::Value {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            std::process::exit(1);
        }
    }
}
