use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::filter::EnvFilter;

use ud_trace::{UdConfig, UdGraph};

/// Builds the use-definition graph of a trace and writes the requested
/// outputs.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Trace file to analyze.
    trace: PathBuf,

    /// Write a DOT digraph of the use-definition edges here.
    #[arg(long)]
    dot: Option<PathBuf>,

    /// Write an HTML rendering of the graph here.
    #[arg(long)]
    html: Option<PathBuf>,

    /// Write code/trace/uses CSV files; the path must contain `{}`.
    #[arg(long)]
    csv: Option<String>,

    /// Persist the graph for later `ud-query` runs; the path must
    /// contain `{}`.
    #[arg(long)]
    store: Option<String>,

    /// First entry index to analyze.
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Entry index to stop at.
    #[arg(long, default_value_t = u64::MAX)]
    end: u64,

    /// Print every trace row as it is flushed.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("UD_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = UdConfig {
        dot: args.dot,
        html: args.html,
        csv: args.csv,
        store: args.store,
        verbose: args.verbose,
    };

    let graph = UdGraph::analyze(&args.trace, args.start..args.end, config)?;
    eprintln!(
        "{} static instructions, {} dynamic instances",
        graph.code_count(),
        graph.trace_count()
    );
    Ok(())
}
