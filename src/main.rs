mod cli;

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Result};
use is_terminal::IsTerminal;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oscsim::config::Config;
use oscsim::printer::{JsonPrinter, SummaryPrinter};
use oscsim::{utils, CapabilityTable, Harness, Limits};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    // Load config, then let flags win
    let cfg = Config::load();
    debug!(path = %cfg.config_path.display(), "config loaded");
    let mut limits = Limits::from_config(&cfg);
    if let Some(ms) = args.timeout_ms {
        limits.timeout = Duration::from_millis(ms);
    }
    if let Some(bytes) = args.max_output_bytes {
        limits.max_output_bytes = bytes;
    }
    let printer = JsonPrinter { pretty: args.pretty || cfg.get_bool("PRETTY_OUTPUT") };

    let harness = Harness::new(CapabilityTable::with_defaults(), limits);
    if args.list_functions {
        printer.print(&harness.capabilities().schemas())?;
        return Ok(ExitCode::SUCCESS);
    }

    // Source precedence: --code, then SCRIPT, then piped stdin
    let script = if let Some(code) = args.code {
        code
    } else if let Some(path) = args.script.as_deref() {
        utils::read_script(path)?
    } else if !io::stdin().is_terminal() {
        utils::read_stdin_script()?
    } else {
        bail!("no script given; pass a SCRIPT path, --code, or pipe the script on stdin");
    };

    let outcome = harness.execute(&script).await;
    printer.print(&outcome)?;
    SummaryPrinter::default().print(&outcome);

    Ok(if outcome.is_success() { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "oscsim=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().without_time().with_writer(io::stderr))
        .init();
}
