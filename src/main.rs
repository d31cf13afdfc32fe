//! s3-presign -- replace `s3-presign://` references with presigned URLs.
//!
//! Reads text or YAML from a file or stdin and writes the rewritten stream
//! to stdout. Logs go to stderr. Any parse or signing failure aborts the run
//! with a non-zero exit status.

use std::io;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use s3_presign::config::{load_config, Config, LoggingConfig};
use s3_presign::input::open_input;
use s3_presign::presigner::SigV4Presigner;
use s3_presign::text::TextSubstitutor;
use s3_presign::yaml::YamlSubstitutor;
use s3_presign::{Grammar, Signer};

/// Command-line arguments for s3-presign.
#[derive(Parser, Debug)]
#[command(
    name = "s3-presign",
    version,
    about = "Replace s3-presign:// references with presigned S3 URLs"
)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace every reference found anywhere in a text stream
    Text {
        /// Input file, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,
    },
    /// Replace references held in whole YAML scalars
    Yaml {
        /// Input file, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    config.apply_env();

    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    let grammar = Grammar::new(&config.reference.scheme, &config.reference.example)?;
    let presigner = SigV4Presigner::from_config(&config.signer)?;
    let signer =
        Signer::new(Box::new(presigner)).with_default_endpoint(config.signer.public_endpoint.clone());

    let stdout = io::stdout().lock();
    match cli.command {
        Commands::Text { input } => {
            let reader = open_input(&input)?;
            TextSubstitutor::new(&grammar, &signer).process_stream(reader, stdout)?;
        }
        Commands::Yaml { input } => {
            let reader = open_input(&input)?;
            YamlSubstitutor::new(&grammar, &signer).process_stream(reader, stdout)?;
        }
    }

    Ok(())
}

/// Initialize tracing on stderr. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
