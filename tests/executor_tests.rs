//! Tests for the Install Executor
//!
//! These drive real `bash` children through the executor (no privilege
//! wrapper) and verify:
//! - Event ordering and terminal status delivery
//! - Cancellation before and during a run
//! - Ephemeral script cleanup on every outcome
//! - Rejection of concurrent runs

use pkgplan::executor::{InstallEvent, InstallExecutor, LaunchConfig, CANCEL_BANNER, FATAL_BANNER};
use pkgplan::install_state::{InstallStatus, TerminalStatus};
use pkgplan::InstallError;
use std::path::Path;
use std::time::{Duration, Instant};

const RUN_DEADLINE: Duration = Duration::from_secs(30);

fn bash_executor() -> InstallExecutor {
    InstallExecutor::new(LaunchConfig::new("bash", ["--noprofile", "--norc"]))
}

/// Collect events until the run reaches a terminal status.
fn drain(executor: &mut InstallExecutor) -> Vec<InstallEvent> {
    let mut events = Vec::new();
    let deadline = Instant::now() + RUN_DEADLINE;
    while !executor.status().is_terminal() {
        assert!(Instant::now() < deadline, "install run did not finish in time");
        if let Some(event) = executor.recv_timeout(Duration::from_millis(200)) {
            events.push(event);
        }
    }
    events
}

/// Wait for a specific output line, returning everything seen so far.
fn wait_for_line(executor: &mut InstallExecutor, wanted: &str) -> Vec<InstallEvent> {
    let mut events = Vec::new();
    let deadline = Instant::now() + RUN_DEADLINE;
    loop {
        assert!(Instant::now() < deadline, "never saw output line {wanted:?}");
        if let Some(event) = executor.recv_timeout(Duration::from_millis(200)) {
            let found = matches!(&event, InstallEvent::Output(line) if line == wanted);
            events.push(event);
            if found {
                return events;
            }
        }
    }
}

fn output_lines(events: &[InstallEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::Output(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}

fn finished_statuses(events: &[InstallEvent]) -> Vec<TerminalStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::Finished(status) => Some(*status),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Terminal Status
// =============================================================================

#[test]
fn test_zero_exit_is_complete() {
    let mut executor = bash_executor();
    executor
        .start("#!/bin/bash\nset -e\necho hello\necho world\n")
        .unwrap();
    let events = drain(&mut executor);

    assert!(matches!(events.first(), Some(InstallEvent::Started { .. })));
    assert_eq!(events.last(), Some(&InstallEvent::Finished(TerminalStatus::Complete)));
    assert_eq!(output_lines(&events), vec!["hello", "world"]);
    assert_eq!(executor.status(), InstallStatus::Complete);
}

#[test]
fn test_nonzero_exit_is_failed() {
    let mut executor = bash_executor();
    executor.start("echo before\nexit 1\necho after\n").unwrap();
    let events = drain(&mut executor);

    assert_eq!(output_lines(&events), vec!["before"]);
    assert_eq!(finished_statuses(&events), vec![TerminalStatus::Failed]);
    assert_eq!(executor.status(), InstallStatus::Failed);
}

#[test]
fn test_stderr_is_merged_in_order() {
    let mut executor = bash_executor();
    executor
        .start("echo one\necho two >&2\necho three\necho four >&2\n")
        .unwrap();
    let events = drain(&mut executor);

    assert_eq!(output_lines(&events), vec!["one", "two", "three", "four"]);
}

#[test]
fn test_terminal_event_is_last_and_single() {
    let mut executor = bash_executor();
    executor.start("for i in 1 2 3 4 5; do echo line$i; done\n").unwrap();
    let events = drain(&mut executor);

    assert_eq!(finished_statuses(&events).len(), 1);
    assert!(matches!(events.last(), Some(InstallEvent::Finished(_))));
    assert!(executor.recv().is_none(), "no events after the terminal one");
}

#[test]
fn test_silent_child_completes() {
    let mut executor = bash_executor();
    executor.start("true\n").unwrap();
    let events = drain(&mut executor);

    assert!(output_lines(&events).is_empty());
    assert_eq!(executor.status(), InstallStatus::Complete);
}

#[test]
fn test_detached_descendant_does_not_hold_the_run_open() {
    // The setsid'd sleep leaves the process group but keeps the output pipe
    let mut executor = bash_executor();
    let started = Instant::now();
    executor
        .start("setsid sleep 6 &\necho ready\nexit 0\n")
        .unwrap();
    let events = drain(&mut executor);

    assert!(started.elapsed() < Duration::from_secs(4), "run waited for the detached process");
    assert_eq!(output_lines(&events), vec!["ready"]);
    assert_eq!(executor.status(), InstallStatus::Complete);
}

#[test]
fn test_cancel_after_exit_keeps_clean_outcome() {
    let mut executor = bash_executor();
    executor
        .start("setsid sleep 6 &\necho ready\nexit 0\n")
        .unwrap();
    let mut events = wait_for_line(&mut executor, "ready");
    std::thread::sleep(Duration::from_secs(1));
    executor.cancel();
    events.extend(drain(&mut executor));

    assert_eq!(finished_statuses(&events), vec![TerminalStatus::Complete]);
}

#[test]
fn test_output_written_just_before_exit_is_kept() {
    let mut executor = bash_executor();
    executor
        .start("setsid sleep 6 &\nfor i in 1 2 3 4 5 6 7 8; do echo tail$i; done\nexit 0\n")
        .unwrap();
    let events = drain(&mut executor);

    let expected: Vec<String> = (1..=8).map(|i| format!("tail{i}")).collect();
    assert_eq!(output_lines(&events), expected);
}

// =============================================================================
// Script Cleanup
// =============================================================================

fn assert_script_removed(events: &[InstallEvent]) {
    let lines = output_lines(events);
    let script = lines.first().expect("script should print its own path");
    assert!(script.contains("pkgplan-"), "unexpected script path {script}");
    assert!(!Path::new(script).exists(), "script {script} was left behind");
}

#[test]
fn test_script_removed_after_success() {
    let mut executor = bash_executor();
    executor.start("echo \"$0\"\n").unwrap();
    let events = drain(&mut executor);
    assert_script_removed(&events);
}

#[test]
fn test_script_removed_after_failure() {
    let mut executor = bash_executor();
    executor.start("echo \"$0\"\nexit 3\n").unwrap();
    let events = drain(&mut executor);
    assert_eq!(executor.status(), InstallStatus::Failed);
    assert_script_removed(&events);
}

#[test]
fn test_script_removed_after_cancel() {
    let mut executor = bash_executor();
    executor.start("echo \"$0\"\necho ready\nsleep 30\n").unwrap();
    let mut events = wait_for_line(&mut executor, "ready");
    executor.cancel();
    events.extend(drain(&mut executor));

    assert_eq!(executor.status(), InstallStatus::Cancelled);
    assert_script_removed(&events);
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancel_while_running() {
    let mut executor = bash_executor();
    executor
        .start("echo ready\nsleep 30\necho unreachable\n")
        .unwrap();
    let mut events = wait_for_line(&mut executor, "ready");
    assert_eq!(executor.status(), InstallStatus::Running);

    executor.cancel();
    events.extend(drain(&mut executor));

    assert_eq!(finished_statuses(&events), vec![TerminalStatus::Cancelled]);
    assert!(!output_lines(&events).contains(&"unreachable".to_string()));
}

#[test]
fn test_cancel_wins_over_clean_exit() {
    // The script ignores SIGTERM and exits 0 on its own; the pending cancel
    // request still decides the outcome.
    let mut executor = bash_executor();
    executor
        .start("trap '' TERM\necho ready\nsleep 0.5\nexit 0\n")
        .unwrap();
    wait_for_line(&mut executor, "ready");
    executor.cancel();
    drain(&mut executor);

    assert_eq!(executor.status(), InstallStatus::Cancelled);
}

#[test]
fn test_cancel_immediately_after_start() {
    let mut executor = bash_executor();
    executor.start("sleep 30\n").unwrap();
    executor.cancel();
    let events = drain(&mut executor);

    assert_eq!(finished_statuses(&events), vec![TerminalStatus::Cancelled]);
    // Either the worker saw the flag before launch, or the child was
    // launched and then terminated; in both cases nothing keeps running.
    let launched = events.iter().any(|e| matches!(e, InstallEvent::Started { .. }));
    if !launched {
        assert_eq!(output_lines(&events), vec![CANCEL_BANNER]);
    }
}

#[test]
fn test_cancel_after_completion_is_noop() {
    let mut executor = bash_executor();
    executor.start("echo done\n").unwrap();
    drain(&mut executor);
    assert_eq!(executor.status(), InstallStatus::Complete);

    executor.cancel();
    executor.cancel();
    assert_eq!(executor.status(), InstallStatus::Complete);
    assert!(executor.cancel_handle().is_none());
    assert!(executor.try_recv().is_none());
}

#[test]
fn test_cancel_handle_from_another_thread() {
    let mut executor = bash_executor();
    executor.start("echo ready\nsleep 30\n").unwrap();
    wait_for_line(&mut executor, "ready");

    let handle = executor.cancel_handle().expect("run is active");
    std::thread::spawn(move || handle.cancel()).join().unwrap();

    drain(&mut executor);
    assert_eq!(executor.status(), InstallStatus::Cancelled);
}

// =============================================================================
// Faults and Concurrency
// =============================================================================

#[test]
fn test_spawn_failure_reports_diagnostic_then_failed() {
    let mut executor =
        InstallExecutor::new(LaunchConfig::new("/nonexistent/pkgplan-launcher", ["--x"]));
    executor.start("echo never\n").unwrap();
    let events = drain(&mut executor);

    assert!(!events.iter().any(|e| matches!(e, InstallEvent::Started { .. })));
    let lines = output_lines(&events);
    assert_eq!(lines.first().map(String::as_str), Some(FATAL_BANNER));
    assert!(lines[1].contains("Failed to launch '/nonexistent/pkgplan-launcher'"));
    assert_eq!(events.last(), Some(&InstallEvent::Finished(TerminalStatus::Failed)));
}

#[test]
fn test_concurrent_start_is_rejected() {
    let mut executor = bash_executor();
    executor.start("echo ready\nsleep 30\n").unwrap();

    let second = executor.start("echo second\n");
    assert!(matches!(second, Err(InstallError::ConcurrentRun { .. })));

    executor.cancel();
    let events = drain(&mut executor);
    assert!(!output_lines(&events).contains(&"second".to_string()));
    assert_eq!(executor.status(), InstallStatus::Cancelled);
}

#[test]
fn test_acknowledge_lifecycle() {
    let mut executor = bash_executor();
    executor.start("echo ready\nsleep 30\n").unwrap();
    assert!(matches!(
        executor.acknowledge(),
        Err(InstallError::RunActive { .. })
    ));

    executor.cancel();
    drain(&mut executor);
    executor.acknowledge().unwrap();
    assert_eq!(executor.status(), InstallStatus::Idle);
    assert!(executor.recv().is_none());
}

#[test]
fn test_finished_run_can_be_restarted_without_acknowledge() {
    let mut executor = bash_executor();
    executor.start("exit 2\n").unwrap();
    drain(&mut executor);
    assert_eq!(executor.status(), InstallStatus::Failed);

    executor.start("echo again\n").unwrap();
    let events = drain(&mut executor);
    assert_eq!(output_lines(&events), vec!["again"]);
    assert_eq!(executor.status(), InstallStatus::Complete);
}

#[test]
fn test_run_to_end_collects_output() {
    let mut executor = bash_executor();
    let mut lines = Vec::new();
    let status = executor
        .run_to_end("echo a\necho b\n", |line| lines.push(line.to_string()))
        .unwrap();

    assert_eq!(status, TerminalStatus::Complete);
    assert_eq!(lines, vec!["a", "b"]);
}
