use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::filter::EnvFilter;

use ud_trace::dump::Dumper;
use ud_trace::Trace;

/// Prints a human readable version of every record in a trace.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Trace file to dump.
    trace: PathBuf,

    /// First entry index to print.
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Entry index to stop at.
    #[arg(long, default_value_t = u64::MAX)]
    end: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("UD_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut trace = Trace::open(&args.trace)?;
    let stdout = io::stdout().lock();
    let mut out = BufWriter::new(stdout);
    let mut dumper = Dumper::new(&mut out, &trace)?;
    trace.visit(&mut dumper, args.start..args.end)?;
    out.flush()?;
    Ok(())
}
