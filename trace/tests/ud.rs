use std::path::Path;

use ud_trace::record::{Endianness, Format, Machine};
use ud_trace::writer::TraceWriter;
use ud_trace::{Error, UdConfig, UdGraph};

const LE64: Format = Format::new(Endianness::Little, 8);
const FULL: std::ops::Range<u64> = 0..u64::MAX;

fn write_trace(dir: &Path, build: impl FnOnce(&mut TraceWriter<Vec<u8>>)) -> std::path::PathBuf {
    let mut writer = TraceWriter::new(Vec::new(), LE64, Machine::X86_64).unwrap();
    build(&mut writer);
    let path = dir.join("trace");
    std::fs::write(&path, writer.into_inner()).unwrap();
    path
}

/// One store followed by one exact load from a different instruction.
fn store_then_load(writer: &mut TraceWriter<Vec<u8>>) {
    writer.insn(1, 0x1000, b"\xaa").unwrap();
    writer.insn_exec(1).unwrap();
    writer.store(1, 0x2000, &[0x04, 0x03, 0x02, 0x01]).unwrap();
    writer.insn(2, 0x1001, b"\xbb").unwrap();
    writer.insn_exec(2).unwrap();
    writer.load(2, 0x2000, &[0x04, 0x03, 0x02, 0x01]).unwrap();
}

#[test]
fn test_store_then_exact_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), store_then_load);
    let graph = UdGraph::analyze(&path, FULL, UdConfig::default()).unwrap();

    assert_eq!(graph.word_size(), 8);
    assert_eq!(graph.machine(), Machine::X86_64);
    // Catch-all plus the two recorded instructions.
    assert_eq!(graph.code_count(), 3);
    assert_eq!(graph.trace_count(), 3);
    assert_eq!(graph.code_for_trace(1), 1);
    assert_eq!(graph.code_for_trace(2), 2);
    assert_eq!(graph.pc_for_code(1), 0x1000);

    // The load in row 2 reads exactly what row 1 stored.
    assert_eq!(graph.mem_uses_for_trace(2), vec![0]);
    assert_eq!(graph.trace_for_mem_use(0), 1);
    assert!(graph.reg_uses_for_trace(2).is_empty());
}

#[test]
fn test_partial_load_resolves_narrowed() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), |writer| {
        writer.insn_exec(1).unwrap();
        writer.store(1, 0x2000, &[0u8; 16]).unwrap();
        writer.insn_exec(2).unwrap();
        writer.load(2, 0x2004, &[0u8; 8]).unwrap();
    });
    let graph = UdGraph::analyze(&path, FULL, UdConfig::default()).unwrap();

    assert_eq!(graph.mem_uses_for_trace(2), vec![0]);
    assert_eq!(graph.trace_for_mem_use(0), 1);
}

#[test]
fn test_use_before_any_def_hits_catch_all_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), |writer| {
        writer.insn_exec(1).unwrap();
        writer.load(1, 0x7000, &[0u8; 8]).unwrap();
        writer.get_reg(1, 0x10, &[0u8; 8]).unwrap();
    });
    let graph = UdGraph::analyze(&path, FULL, UdConfig::default()).unwrap();

    assert_eq!(graph.trace_for_mem_use(0), 0);
    assert_eq!(graph.trace_for_reg_use(0), 0);
    assert_eq!(graph.disasm_for_code(graph.code_for_trace(0)), "<unknown>");
}

#[test]
fn test_register_dataflow_through_sizeless_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), |writer| {
        writer.insn_exec(1).unwrap();
        writer.put_reg_nx(1, 0x98, 16).unwrap();
        writer.insn_exec(2).unwrap();
        writer.get_reg_nx(2, 0x98, 16).unwrap();
    });
    let graph = UdGraph::analyze(&path, FULL, UdConfig::default()).unwrap();

    assert_eq!(graph.reg_uses_for_trace(2), vec![0]);
    assert_eq!(graph.trace_for_reg_use(0), 1);
}

#[test]
fn test_aggregate_reg_records_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), |writer| {
        writer.insn_exec(1).unwrap();
        writer.reg(1, 0x10, &[0u8; 8]).unwrap();
    });
    let graph = UdGraph::analyze(&path, FULL, UdConfig::default()).unwrap();

    assert!(graph.reg_uses_for_trace(1).is_empty());
}

#[test]
fn test_out_of_order_static_code_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), |writer| {
        writer.insn(2, 0x1000, b"\xaa").unwrap();
    });
    assert!(matches!(
        UdGraph::analyze(&path, FULL, UdConfig::default()),
        Err(Error::UnexpectedInsnSeq {
            got: 2,
            expected: 1
        })
    ));
}

#[test]
fn test_reopened_store_answers_the_same_queries() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), store_then_load);
    let store = format!("{}/ud-{{}}", dir.path().display());

    let config = UdConfig {
        store: Some(store.clone()),
        ..UdConfig::default()
    };
    let fresh = UdGraph::analyze(&path, FULL, config).unwrap();
    let fresh_answers = (
        fresh.code_count(),
        fresh.trace_count(),
        fresh.codes_for_pc(0x1000),
        fresh.mem_uses_for_trace(2),
        fresh.trace_for_mem_use(0),
        fresh.disasm_for_code(1),
    );
    drop(fresh);

    let reopened = UdGraph::load(&store).unwrap();
    assert_eq!(reopened.machine(), Machine::X86_64);
    assert_eq!(reopened.endianness(), Endianness::Little);
    assert_eq!(
        fresh_answers,
        (
            reopened.code_count(),
            reopened.trace_count(),
            reopened.codes_for_pc(0x1000),
            reopened.mem_uses_for_trace(2),
            reopened.trace_for_mem_use(0),
            reopened.disasm_for_code(1),
        )
    );
}

#[test]
fn test_load_requires_placeholder() {
    assert!(UdGraph::load("no-placeholder").is_err());
}

#[test]
fn test_dot_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), store_then_load);
    let dot = dir.path().join("ud.dot");
    let config = UdConfig {
        dot: Some(dot.clone()),
        ..UdConfig::default()
    };
    UdGraph::analyze(&path, FULL, config).unwrap();

    let text = std::fs::read_to_string(&dot).unwrap();
    assert!(text.starts_with("digraph ud {"));
    assert!(text.contains("0 [label=\"[0] 0x0: <unknown>\"]"));
    assert!(text.contains("2 -> 1 [label=\"m0x2000-0x2004\"]"));
    assert!(text.trim_end().ends_with('}'));
}

#[test]
fn test_html_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), store_then_load);
    let html = dir.path().join("ud.html");
    let config = UdConfig {
        html: Some(html.clone()),
        ..UdConfig::default()
    };
    UdGraph::analyze(&path, FULL, config).unwrap();

    let text = std::fs::read_to_string(&html).unwrap();
    assert!(text.contains("<tr id=\"1\">"));
    assert!(text.contains("<a href=\"#1\">m0x2000-0x2004</a>"));
    assert!(text.contains("m0x2000-0x2004\n"));
}

#[test]
fn test_csv_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), store_then_load);
    let csv = format!("{}/{{}}.csv", dir.path().display());
    let config = UdConfig {
        csv: Some(csv),
        ..UdConfig::default()
    };
    UdGraph::analyze(&path, FULL, config).unwrap();

    let code = std::fs::read_to_string(dir.path().join("code.csv")).unwrap();
    assert!(code.lines().next().unwrap().starts_with("0,0,,"));
    assert!(code.contains("1,4096,aa,"));

    let trace = std::fs::read_to_string(dir.path().join("trace.csv")).unwrap();
    assert_eq!(trace.lines().collect::<Vec<_>>(), vec!["0,0", "1,1", "2,2"]);

    let uses = std::fs::read_to_string(dir.path().join("uses.csv")).unwrap();
    assert_eq!(uses.lines().collect::<Vec<_>>(), vec!["2,1,m,8192,8196"]);
}

#[test]
fn test_window_restricts_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_trace(dir.path(), store_then_load);
    // Entries 0..4 cover only the first instruction's records.
    let graph = UdGraph::analyze(&path, 0..4, UdConfig::default()).unwrap();

    assert_eq!(graph.trace_count(), 2);
    assert_eq!(graph.code_count(), 3);
}

#[test]
fn test_32bit_big_endian_trace() {
    let dir = tempfile::tempdir().unwrap();
    let be32 = Format::new(Endianness::Big, 4);
    let mut writer = TraceWriter::new(Vec::new(), be32, Machine::Arm).unwrap();
    writer.insn_exec(1).unwrap();
    writer.store(1, 0x2000, &[1, 2]).unwrap();
    writer.insn_exec(2).unwrap();
    writer.load(2, 0x2000, &[1, 2]).unwrap();
    let path = dir.path().join("trace");
    std::fs::write(&path, writer.into_inner()).unwrap();

    let graph = UdGraph::analyze(&path, FULL, UdConfig::default()).unwrap();
    assert_eq!(graph.word_size(), 4);
    assert_eq!(graph.trace_for_mem_use(0), 1);
}
