use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir() -> PathBuf {
    let mut path = std::env::temp_dir();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    path.push(format!("rstfix-test-{}-{}", std::process::id(), stamp));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

fn rstfix_bin() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_rstfix") {
        return PathBuf::from(path);
    }
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("target");
    path.push("debug");
    if cfg!(windows) {
        path.push("rstfix.exe");
    } else {
        path.push("rstfix");
    }
    path
}

const INPUT: &str = "\
NAME
====

MPI_Abort - aborts a communicator

SEE ALSO
========

MPI_Send
mpi_finalize
";

#[test]
fn cli_writes_output_file() {
    let dir = temp_dir();
    let input = dir.join("MPI_Abort.3.rst");
    let refs = dir.join("allrefs.txt");
    let output = dir.join("out.rst");

    fs::write(&input, INPUT).expect("write input");
    fs::write(&refs, "mpi_abort\nmpi_finalize\n").expect("write refs");

    let status = Command::new(rstfix_bin())
        .args([
            input.to_str().unwrap(),
            output.to_str().unwrap(),
            "--refs",
            refs.to_str().unwrap(),
        ])
        .status()
        .expect("run rstfix");

    assert!(status.success());
    let rst = fs::read_to_string(output).expect("read output");
    assert!(rst.starts_with(".. _mpi_abort:\n"));
    assert!(rst.contains("\nMPI_Abort\n=========\n"));
    assert!(rst.contains(".. seealso:: MPI_Send :ref:`mpi_finalize`"));
}

#[test]
fn cli_defaults_to_stdout() {
    let dir = temp_dir();
    let input = dir.join("MPI_Abort.3.rst");
    let refs = dir.join("allrefs.txt");

    fs::write(&input, INPUT).expect("write input");
    fs::write(&refs, "mpi_abort\n").expect("write refs");

    let out = Command::new(rstfix_bin())
        .args([input.to_str().unwrap(), "--refs", refs.to_str().unwrap()])
        .output()
        .expect("run rstfix");

    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).expect("utf8 stdout");
    assert!(stdout.starts_with(".. _mpi_abort:\n"));
}

#[test]
fn cli_survives_missing_reference_table() {
    let dir = temp_dir();
    let input = dir.join("MPI_Abort.3.rst");

    fs::write(&input, INPUT).expect("write input");

    let out = Command::new(rstfix_bin())
        .args([
            input.to_str().unwrap(),
            "--refs",
            dir.join("no-such-refs.txt").to_str().unwrap(),
        ])
        .output()
        .expect("run rstfix");

    // Cross-referencing degrades to plain text, not a failure.
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).expect("utf8 stdout");
    assert!(stdout.contains(".. seealso:: MPI_Send mpi_finalize"));
    assert!(!stdout.contains(":ref:`mpi_finalize`"));
}

#[test]
fn cli_requires_input_argument() {
    let out = Command::new(rstfix_bin()).output().expect("run rstfix");
    assert!(!out.status.success());
    let stderr = String::from_utf8(out.stderr).expect("utf8 stderr");
    assert!(stderr.contains("Usage"));
}

#[test]
fn cli_fails_on_unreadable_input() {
    let dir = temp_dir();
    let missing = dir.join("no-such-page.rst");

    let out = Command::new(rstfix_bin())
        .arg(missing.to_str().unwrap())
        .output()
        .expect("run rstfix");

    assert!(!out.status.success());
    let stderr = String::from_utf8(out.stderr).expect("utf8 stderr");
    assert!(stderr.contains("no-such-page"));
}
