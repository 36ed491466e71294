//! `evtally simulate` end-to-end.
//!
//! These tests run the built binary and check its exit status, the final
//! snapshot on stdout and the report lines on stderr.

use std::process::{Command, Output};

fn evtally(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_evtally"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute evtally")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "exit code: {}, stderr: {}",
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// TC-1.1: no subcommand prints help and exits 0.
#[test]
fn tc_1_1_no_subcommand_prints_help() {
    let output = evtally(&[]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("simulate"), "help missing subcommand: {stdout}");
}

/// TC-1.2: invalid arguments are rejected before anything runs.
#[test]
fn tc_1_2_invalid_workers_rejected() {
    let output = evtally(&["simulate", "--workers", "0"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

/// TC-2.1: JSON snapshot totals and report lines.
#[test]
fn tc_2_1_json_snapshot() {
    let output = evtally(&[
        "simulate",
        "--workers",
        "2",
        "--events",
        "5000",
        "--threshold",
        "500",
        "--pid-range",
        "50",
        "--format",
        "json",
    ]);
    assert_success(&output);

    let v: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON");
    let packets = v["traffic"]["packets"].as_u64().unwrap();
    let execs: u64 = v["exec_by_comm"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["count"].as_u64().unwrap())
        .sum();

    assert!(packets > 0);
    assert_eq!(v["packet_counter"].as_u64(), Some(packets));
    assert!(packets + execs <= 10_000);
    assert!(v["exec_by_pid"].as_array().unwrap().len() <= 50);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.lines().any(|l| l.starts_with("Traffic stats: ")),
        "no traffic report in stderr: {stderr}"
    );
}

/// TC-2.2: same seed, same counters.
#[test]
fn tc_2_2_seed_is_deterministic_single_worker() {
    let args = [
        "simulate",
        "--workers",
        "1",
        "--events",
        "3000",
        "--seed",
        "99",
        "--format",
        "tsv",
    ];
    let a = evtally(&args);
    let b = evtally(&args);
    assert_success(&a);
    assert_success(&b);
    assert_eq!(a.stdout, b.stdout);
}

/// TC-2.3: TSV header and fixed slot rows.
#[test]
fn tc_2_3_tsv_output() {
    let output = evtally(&["simulate", "--workers", "2", "--events", "1000"]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("table\tpid\tname\tcount"));
    assert!(stdout.contains("\ntraffic\t-\tpackets\t"));
    assert!(stdout.contains("\npacket_counter\t-\tpackets\t"));
    for line in stdout.lines() {
        assert_eq!(line.split('\t').count(), 4, "bad row: {line:?}");
    }
}

/// TC-2.4: pretty output with a tiny name table reports drops.
#[test]
fn tc_2_4_pretty_with_drops() {
    let output = evtally(&[
        "simulate",
        "--workers",
        "2",
        "--events",
        "5000",
        "--comm-capacity",
        "2",
        "--format",
        "pretty",
    ]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Process Exec Statistics"));
    assert!(stdout.contains("Total unique processes:"));
    assert!(stdout.contains("Dropped:"));
}

fn metric_values<'a>(text: &'a str, name: &'a str) -> impl Iterator<Item = u64> + 'a {
    text.lines()
        .filter(move |l| l.starts_with(name) && !l.starts_with('#'))
        .filter_map(|l| l.rsplit(' ').next()?.parse().ok())
}

/// TC-2.5: Prometheus output totals agree with the per-name samples.
#[test]
fn tc_2_5_prometheus_output() {
    let output = evtally(&[
        "simulate",
        "--workers",
        "2",
        "--events",
        "4000",
        "--pid-range",
        "32",
        "--format",
        "prometheus",
    ]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# TYPE execve_total_calls counter"));
    assert!(stdout.contains("# TYPE execve_instances gauge"));
    let per_name: u64 = metric_values(&stdout, "execve_total_calls{").sum();
    let total: Vec<u64> = metric_values(&stdout, "execve_all_calls_total").collect();
    assert!(per_name > 0);
    assert_eq!(total, vec![per_name]);
}

/// TC-2.6: watch mode prints polled frames and the all-calls counter never
/// goes backwards across them.
#[test]
fn tc_2_6_watch_frames_monotonic() {
    let output = evtally(&[
        "simulate",
        "--workers",
        "2",
        "--events",
        "300000",
        "--poll-interval",
        "0.1",
        "--watch",
        "--format",
        "prometheus",
    ]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let totals: Vec<u64> = metric_values(&stdout, "execve_all_calls_total").collect();
    // At least the final frame, plus one per poll that saw new counts.
    assert!(!totals.is_empty());
    assert!(
        totals.windows(2).all(|w| w[0] <= w[1]),
        "totals went backwards: {totals:?}"
    );
    // Every frame starts with the all-calls family; the last one is the final snapshot.
    let last_frame = stdout.rsplit("# HELP execve_all_calls_total").next().unwrap();
    let per_name: u64 = metric_values(last_frame, "execve_total_calls{").sum();
    assert!(per_name > 0);
    assert_eq!(totals.last().copied(), Some(per_name));
}
