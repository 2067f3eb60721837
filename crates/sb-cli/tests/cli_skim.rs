use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{ArrayRef, AsArray, Float32Builder, Int32Builder, ListBuilder, UInt32Array, UInt64Array};
use arrow::datatypes::Int64Type;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sixb-skim"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("sixb_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn s(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn lists_f32(n: usize, row: &[f32]) -> ArrayRef {
    let mut b = ListBuilder::new(Float32Builder::new());
    for _ in 0..n {
        b.values().append_slice(row);
        b.append(true);
    }
    Arc::new(b.finish())
}

fn lists_i32(n: usize, row: &[i32]) -> ArrayRef {
    let mut b = ListBuilder::new(Int32Builder::new());
    for _ in 0..n {
        b.values().append_slice(row);
        b.append(true);
    }
    Arc::new(b.finish())
}

fn write_input(path: &Path, n: usize) {
    let batch = RecordBatch::try_from_iter(vec![
        ("run", Arc::new(UInt32Array::from(vec![7u32; n])) as ArrayRef),
        ("luminosityBlock", Arc::new(UInt32Array::from((0..n as u32).map(|i| 1 + i % 2).collect::<Vec<_>>())) as ArrayRef),
        ("event", Arc::new(UInt64Array::from((0..n as u64).collect::<Vec<_>>())) as ArrayRef),
        ("Jet_pt", lists_f32(n, &[80.0, 50.0, 30.0])),
        ("Jet_eta", lists_f32(n, &[0.1, -0.4, 1.2])),
        ("Jet_phi", lists_f32(n, &[0.0, 1.5, -1.5])),
        ("Jet_mass", lists_f32(n, &[10.0, 7.0, 5.0])),
        ("Jet_btagDeepFlavB", lists_f32(n, &[0.2, 0.8, 0.5])),
        ("Jet_jetId", lists_i32(n, &[6, 6, 2])),
        ("Jet_puId", lists_i32(n, &[7, 7, 7])),
    ])
    .unwrap();
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

/// Config, file list and (empty) input in a fresh directory.
fn setup(name: &str, cfg: &str) -> (PathBuf, PathBuf, PathBuf) {
    let dir = tmp_dir(name);
    let cfg_path = dir.join("job.yaml");
    std::fs::write(&cfg_path, cfg).unwrap();
    let input = dir.join("nano.parquet");
    std::fs::write(&input, b"").unwrap();
    let list = dir.join("files.txt");
    std::fs::write(&list, format!("{}\n", input.display())).unwrap();
    (dir, cfg_path, list)
}

#[test]
fn malformed_jes_directive_names_the_field() {
    let (dir, cfg, list) = setup("bad_jes", "{}\n");
    let out = run(&[
        "--cfg",
        &s(&cfg),
        "--input",
        &s(&list),
        "--output",
        &s(&dir.join("out.parquet")),
        "--jes-shift-syst",
        "Total:sideways",
    ]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("jes-shift-syst"), "stderr={stderr}");
    assert!(stderr.contains("Total:sideways"), "stderr={stderr}");
    assert!(!dir.join("out.parquet").exists());
}

#[test]
fn malformed_jer_directive_fails() {
    let (dir, cfg, list) = setup("bad_jer", "{}\n");
    let out = run(&[
        "--cfg",
        &s(&cfg),
        "--input",
        &s(&list),
        "--output",
        &s(&dir.join("out.parquet")),
        "--jer-shift-syst",
        "sideways",
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("jer-shift-syst"));
}

#[test]
fn missing_file_list_is_fatal() {
    let (dir, cfg, _) = setup("no_list", "{}\n");
    let out = run(&[
        "--cfg",
        &s(&cfg),
        "--input",
        &s(&dir.join("does_not_exist.txt")),
        "--output",
        &s(&dir.join("out.parquet")),
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("file list"));
}

#[test]
fn three_token_trigger_directive_is_fatal() {
    let cfg = "triggers:\n  apply_trigger: true\n  make_or_of:\n    - \"HLT_x:2:3\"\n";
    let (dir, cfg, list) = setup("bad_trigger", cfg);
    let out = run(&[
        "--cfg",
        &s(&cfg),
        "--input",
        &s(&list),
        "--output",
        &s(&dir.join("out.parquet")),
        "--is-data",
    ]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("triggers.make_or_of"), "stderr={stderr}");
    assert!(stderr.contains("HLT_x:2:3"), "stderr={stderr}");
}

#[test]
fn data_without_lumimask_is_fatal() {
    let (dir, cfg, list) = setup("no_mask", "{}\n");
    let out = run(&[
        "--cfg",
        &s(&cfg),
        "--input",
        &s(&list),
        "--output",
        &s(&dir.join("out.parquet")),
        "--is-data",
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("data.lumimask"));
}

#[test]
fn data_skim_writes_gated_output() {
    let dir = tmp_dir("data_ok");
    write_input(&dir.join("nano.parquet"), 10);
    std::fs::write(dir.join("golden.json"), r#"{"7": [[1, 1]]}"#).unwrap();
    std::fs::write(dir.join("files.txt"), format!("{}\n", dir.join("nano.parquet").display())).unwrap();
    // relative path resolved against the config directory
    std::fs::write(dir.join("job.yaml"), "data:\n  lumimask: golden.json\nsixb:\n  n_max: 2\n").unwrap();
    let output = dir.join("skim.parquet");

    let out = run(&[
        "--cfg",
        &s(&dir.join("job.yaml")),
        "--input",
        &s(&dir.join("files.txt")),
        "--output",
        &s(&output),
        "--max-evts",
        "-1",
        "--is-data",
        "--is-signal",
        "--save-p4",
        "--log-level",
        "warn",
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let file = std::fs::File::open(&output).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
    let batches: Vec<RecordBatch> = reader.collect::<Result<_, _>>().unwrap();
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    assert_eq!(rows, 5);

    let batch = &batches[0];
    assert!(batch.column_by_name("sixb_m").is_some());
    let lumi = batch.column_by_name("LumiSec").unwrap().as_primitive::<Int64Type>();
    assert!(lumi.values().iter().all(|&l| l == 1));
    let presel = batch.column_by_name("n_presel_jet").unwrap().as_primitive::<Int64Type>();
    assert!(presel.values().iter().all(|&n| n == 2));
    let sixb = batch.column_by_name("n_sixb_jet").unwrap().as_primitive::<Int64Type>();
    assert!(sixb.values().iter().all(|&n| n == 2));
    let nfound = batch.column_by_name("nfound_all").unwrap().as_primitive::<Int64Type>();
    assert!(nfound.values().iter().all(|&n| n == 0));
}

#[test]
fn capped_run_stops_early() {
    let dir = tmp_dir("cap");
    write_input(&dir.join("nano.parquet"), 10);
    std::fs::write(dir.join("golden.json"), r#"{"7": [[1, 2]]}"#).unwrap();
    std::fs::write(dir.join("files.txt"), format!("{}\n", dir.join("nano.parquet").display())).unwrap();
    std::fs::write(dir.join("job.json"), r#"{"data": {"lumimask": "golden.json"}}"#).unwrap();
    let output = dir.join("skim.parquet");

    let out = run(&[
        "--cfg",
        &s(&dir.join("job.json")),
        "--input",
        &s(&dir.join("files.txt")),
        "--output",
        &s(&output),
        "--max-evts",
        "3",
        "--is-data",
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let file = std::fs::File::open(&output).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
    let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
    assert_eq!(rows, 3);
}
