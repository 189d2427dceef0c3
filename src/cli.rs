use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "oscsim", about = "Run oscillator simulation scripts in a sandbox", version)]
pub struct Cli {
    /// Script file to execute. Read from stdin when omitted and stdin is piped.
    #[arg(value_name = "SCRIPT")]
    pub script: Option<PathBuf>,

    /// Script text given inline; takes precedence over SCRIPT and stdin.
    #[arg(short = 'c', long)]
    pub code: Option<String>,

    /// Wall-clock limit for one execution, in milliseconds.
    #[arg(long = "timeout-ms", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: Option<u64>,

    /// Ceiling on captured `print` output, in bytes.
    #[arg(long = "max-output-bytes")]
    pub max_output_bytes: Option<usize>,

    /// Pretty-print the JSON outcome.
    #[arg(long)]
    pub pretty: bool,

    /// Print the exposed functions and their parameters as JSON, then exit.
    #[arg(long = "list-functions")]
    pub list_functions: bool,

    /// Log harness activity to stderr (RUST_LOG overrides).
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
