use std::process::{Command, Output};

fn txnbench(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_txnbench"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to launch txnbench")
}

/// Argument and run failures exit with -1.
fn assert_failed(out: &Output) {
    assert_eq!(out.status.code(), Some(255), "{}", stdout(out));
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn two_eager_workers_insert_every_row() {
    let out = txnbench(&["400", "50", "2", "eager", "--verify"]);
    let text = stdout(&out);
    assert!(out.status.success(), "{text}");
    assert!(text.contains("iterations/thread: 4"), "{text}");
    assert!(text.contains("rows: 400 | batches: 8 | conflicts: 0"), "{text}");
    assert!(text.contains("rows/s"), "{text}");
}

#[test]
fn uneven_split_drops_the_remainder() {
    let out = txnbench(&["1000", "100", "4", "lazy", "--verify"]);
    let text = stdout(&out);
    assert!(out.status.success(), "{text}");
    assert!(text.contains("dropped: 200"), "{text}");
    assert!(text.contains("rows: 800 | batches: 8"), "{text}");
}

#[test]
fn file_backed_stores_run() {
    for store in ["redb", "sled"] {
        let out = txnbench(&["300", "25", "3", "--store", store, "--two-phase", "--verify"]);
        let text = stdout(&out);
        assert!(out.status.success(), "{store}: {text}");
        assert!(text.contains("rows: 300"), "{store}: {text}");
    }
}

#[test]
fn missing_arguments_print_usage() {
    let out = txnbench(&["400", "50"]);
    let text = stdout(&out);
    assert_failed(&out);
    assert!(text.contains("Usage"), "{text}");
    assert!(!text.contains("=== RUN"), "{text}");
}

#[test]
fn non_positive_arguments_are_rejected() {
    for args in [["0", "50", "2"], ["400", "x", "2"], ["400", "50", "-1"]] {
        let out = txnbench(&args);
        assert_failed(&out);
        assert!(!stdout(&out).contains("=== CONFIG"), "{args:?}");
    }
}

#[test]
fn unknown_init_mode_is_rejected() {
    let out = txnbench(&["400", "50", "2", "sometimes"]);
    assert_failed(&out);
}

#[test]
fn more_threads_than_batches_fails_cleanly() {
    let out = txnbench(&["1", "1", "200000", "lazy"]);
    let text = stdout(&out);
    assert_failed(&out);
    assert!(text.contains("do not fill one batch"), "{text}");
    assert!(!text.contains("=== CONFIG"), "{text}");
}
