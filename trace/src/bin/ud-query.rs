use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::EnvFilter;

use ud_trace::UdGraph;

/// Queries a use-definition store persisted by `ud-analyze --store`.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Store path template containing `{}`.
    store: String,

    #[command(subcommand)]
    query: Query,
}

#[derive(Subcommand, Debug)]
enum Query {
    /// Static instructions at a program counter.
    Pc { pc: String },
    /// Address, disassembly, and dynamic instances of a static instruction.
    Code { code: u32 },
    /// Static instruction and uses of a dynamic instance.
    Trace { trace: u32 },
    /// Dynamic instance that produced the value read by a register use.
    RegUse { reg_use: u32 },
    /// Dynamic instance that produced the value read by a memory use.
    MemUse { mem_use: u32 },
}

fn parse_addr(value: &str) -> Result<u64> {
    let trimmed = value.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).with_context(|| format!("not a hex address: {value}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("UD_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let graph = UdGraph::load(&args.store)?;

    match args.query {
        Query::Pc { pc } => {
            for code in graph.codes_for_pc(parse_addr(&pc)?) {
                println!("{code} {}", graph.disasm_for_code(code));
            }
        }
        Query::Code { code } => {
            println!("pc     {:#x}", graph.pc_for_code(code));
            println!("disasm {}", graph.disasm_for_code(code));
            for trace in graph.traces_for_code(code) {
                println!("trace  {trace}");
            }
        }
        Query::Trace { trace } => {
            let code = graph.code_for_trace(trace);
            println!(
                "code   {code} @ {:#x}: {}",
                graph.pc_for_code(code),
                graph.disasm_for_code(code)
            );
            for reg_use in graph.reg_uses_for_trace(trace) {
                println!("reg use {reg_use} <- trace {}", graph.trace_for_reg_use(reg_use));
            }
            for mem_use in graph.mem_uses_for_trace(trace) {
                println!("mem use {mem_use} <- trace {}", graph.trace_for_mem_use(mem_use));
            }
        }
        Query::RegUse { reg_use } => {
            println!("{}", graph.trace_for_reg_use(reg_use));
        }
        Query::MemUse { mem_use } => {
            println!("{}", graph.trace_for_mem_use(mem_use));
        }
    }
    Ok(())
}
