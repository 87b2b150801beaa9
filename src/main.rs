use std::{
    fs::File,
    io::{self, BufReader, IsTerminal, Read, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use weight_posterior::{validate_datasets, Dataset, InferenceSession, ProgressCallback, SamplerSettings};

/// Estimate item weights from observed counts and print the posterior as JSON.
#[derive(Parser)]
#[command(name = "weight-posterior")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON request of the form `{"datasets": [...], "options": {...}}`.
    /// Reads stdin if missing.
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Override the seed given in the request options.
    #[arg(long, env = "WEIGHT_POSTERIOR_SEED")]
    seed: Option<u64>,

    /// Refuse datasets without any observed output.
    #[arg(long)]
    strict: bool,

    /// Pretty-print the result.
    #[arg(long)]
    pretty: bool,

    /// More log output on stderr (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Deserialize)]
struct Request {
    datasets: Vec<Dataset>,
    #[serde(default)]
    options: SamplerSettings,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("weight_posterior={level}")));
    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn read_request(input: Option<&PathBuf>) -> Result<Request> {
    let request = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Could not open request file {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
        }
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Could not read request from stdin")?;
            serde_json::from_str(&buffer)
        }
    };
    request.context("Invalid inference request")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut request = read_request(cli.input.as_ref())?;
    if let Some(seed) = cli.seed {
        request.options.seed = seed;
    }
    if cli.strict {
        validate_datasets(&request.datasets)?;
    }

    let progress = ProgressCallback::new(|progress| {
        debug!(phase = ?progress.phase, percent = progress.percent, "Progress");
    });
    let result = InferenceSession::new(&request.datasets, request.options)
        .with_progress(progress)
        .run()?;

    let mut stdout = io::stdout().lock();
    if cli.pretty {
        serde_json::to_writer_pretty(&mut stdout, &result)?;
    } else {
        serde_json::to_writer(&mut stdout, &result)?;
    }
    writeln!(stdout)?;
    Ok(())
}
