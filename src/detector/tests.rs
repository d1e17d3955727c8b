use super::*;
use crate::call_site::CallSite;
use crate::clock::ManualClock;
use crate::config::ConfigKey;
use crate::io_info::OpType;
use crate::issue::{IssueKind, Severity};

const MAIN_TID: i64 = 100;

fn env() -> Env {
    Env {
        main_thread_id: Some(MAIN_TID),
        ..Env::default()
    }
}

/// Finalized record with `ops` reads (or writes) of `size` bytes, each
/// costing `cost_us` and 10µs apart so they form one continual run.
fn record(path: &str, op: OpType, ops: u64, size: u64, cost_us: u64) -> IoInfo {
    record_on(path, op, ops, size, cost_us, MAIN_TID, "at read()")
}

fn record_on(
    path: &str,
    op: OpType,
    ops: u64,
    size: u64,
    cost_us: u64,
    tid: i64,
    stack: &str,
) -> IoInfo {
    let mut info = IoInfo::new(path, CallSite::new(tid, "t", stack), 0, 0);
    for i in 0..ops {
        info.record_op(op, size, cost_us, 10 * (i + 1), 8_000);
    }
    info.finalize(10 * (ops + 1), Some(1 << 20));
    info
}

fn repeat_read(clock: &Arc<ManualClock>) -> RepeatReadDetector {
    RepeatReadDetector::new(clock.clone())
}

// =========================================================================
// MAIN THREAD
// =========================================================================

#[test]
fn test_main_thread_flags_regardless_of_cost() {
    let mut detector = MainThreadDetector;
    let mut issues = Vec::new();
    detector
        .detect(&env(), &record("/f", OpType::Read, 1, 10, 1), &mut issues)
        .unwrap();

    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind(), IssueKind::MainThreadIo);
    assert_eq!(issues[0].severity(), Severity::Low);
}

#[test]
fn test_main_thread_ignores_other_threads() {
    let mut detector = MainThreadDetector;
    let mut issues = Vec::new();
    let info = record_on("/f", OpType::Read, 3, 10, 50_000, MAIN_TID + 1, "s");
    detector.detect(&env(), &info, &mut issues).unwrap();
    assert!(issues.is_empty());
}

#[test]
fn test_main_thread_ignores_open_close_without_io() {
    let mut detector = MainThreadDetector;
    let mut issues = Vec::new();
    detector
        .detect(&env(), &record("/f", OpType::Read, 0, 0, 0), &mut issues)
        .unwrap();
    assert!(issues.is_empty());
}

#[test]
fn test_main_thread_severity_grades() {
    let mut detector = MainThreadDetector;
    let mut issues = Vec::new();
    let env = env();

    detector
        .detect(&env, &record("/medium", OpType::Read, 1, 10, 20_000), &mut issues)
        .unwrap();
    detector
        .detect(&env, &record("/high", OpType::Write, 3, 10, 200_000), &mut issues)
        .unwrap();

    assert_eq!(issues[0].severity(), Severity::Medium);
    assert_eq!(issues[1].severity(), Severity::High);
}

// =========================================================================
// SMALL BUFFER
// =========================================================================

#[test]
fn test_small_buffer_flags_many_small_ops() {
    let mut detector = SmallBufferDetector;
    let mut issues = Vec::new();
    detector
        .detect(&env(), &record("/f", OpType::Read, 21, 512, 5), &mut issues)
        .unwrap();

    assert_eq!(issues.len(), 1);
    match &issues[0].detail {
        crate::issue::IssueDetail::SmallBuffer { average_op_size } => {
            assert_eq!(*average_op_size, 512)
        }
        other => panic!("unexpected detail {other:?}"),
    }
}

#[test]
fn test_small_buffer_ignores_few_ops() {
    let mut detector = SmallBufferDetector;
    let mut issues = Vec::new();
    detector
        .detect(&env(), &record("/f", OpType::Read, 20, 512, 5), &mut issues)
        .unwrap();
    assert!(issues.is_empty());
}

#[test]
fn test_small_buffer_ignores_large_buffers() {
    let mut detector = SmallBufferDetector;
    let mut issues = Vec::new();
    detector
        .detect(&env(), &record("/f", OpType::Write, 500, 4096, 5), &mut issues)
        .unwrap();
    assert!(issues.is_empty());
}

// =========================================================================
// REPEAT READ
// =========================================================================

#[test]
fn test_repeat_read_ignores_cheap_unseen_path() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let mut issues = Vec::new();

    detector
        .detect(&env(), &record("/cheap", OpType::Read, 1, 4096, 100), &mut issues)
        .unwrap();

    assert!(!detector.is_observing("/cheap"));
    assert!(issues.is_empty());
}

#[test]
fn test_repeat_read_baseline_is_not_an_issue() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let mut issues = Vec::new();

    detector
        .detect(&env(), &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
        .unwrap();

    assert!(issues.is_empty());
    assert_eq!(detector.history("/f").unwrap().len(), 1);
    assert_eq!(detector.history("/f").unwrap()[0].repeat_count, 1);
}

#[test]
fn test_repeat_read_emits_once_at_threshold() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let env = env();
    let mut emitted = Vec::new();

    for _ in 0..8 {
        let mut issues = Vec::new();
        detector
            .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
            .unwrap();
        emitted.push(issues.len());
        clock.advance_ms(1);
    }

    assert_eq!(emitted, vec![0, 0, 0, 0, 1, 0, 0, 0]);
}

#[test]
fn test_repeat_read_lowest_threshold_fires_on_first_repeat() {
    let clock = Arc::new(ManualClock::new(0));
    let mut set = DetectorSet::new();
    set.register(Box::new(repeat_read(&clock)));

    let mut env = env();
    assert!(env.set(ConfigKey::RepeatReadThreshold, 1).is_err());
    env.set(ConfigKey::RepeatReadThreshold, 2).unwrap();

    let mut emitted = Vec::new();
    for _ in 0..10 {
        let outcome = set.run(&env, &record("/f", OpType::Read, 1, 4096, 20_000));
        emitted.push(outcome.issues.len());
        clock.advance_ms(1);
    }

    assert_eq!(emitted, vec![0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn test_repeat_read_issue_payload() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let env = env();
    let mut issues = Vec::new();

    for _ in 0..env.repeat_read_threshold {
        detector
            .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
            .unwrap();
    }

    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].repeat_read_count(), Some(env.repeat_read_threshold));
    assert_eq!(issues[0].stack, "at read()");
    assert!(matches!(
        issues[0].detail,
        crate::issue::IssueDetail::RepeatRead { op_size: 4096, .. }
    ));
}

#[test]
fn test_repeat_read_write_resets_history() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let env = env();
    let mut issues = Vec::new();

    for _ in 0..3 {
        detector
            .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
            .unwrap();
    }
    detector
        .detect(&env, &record("/f", OpType::Write, 1, 10, 1), &mut issues)
        .unwrap();
    assert!(detector.history("/f").unwrap().is_empty());

    for _ in 0..3 {
        detector
            .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
            .unwrap();
    }
    assert!(issues.is_empty());
}

#[test]
fn test_repeat_read_window_expiry_clears_history() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let env = env();
    let mut issues = Vec::new();

    detector
        .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
        .unwrap();
    clock.advance_ms(REPEAT_READ_WINDOW_MS + 1);
    detector
        .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
        .unwrap();

    let history = detector.history("/f").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].repeat_count, 1);
    assert_eq!(history[0].observed_at_ms, REPEAT_READ_WINDOW_MS + 1);
}

#[test]
fn test_repeat_read_window_boundary_is_inclusive() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let env = env();
    let mut issues = Vec::new();

    detector
        .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
        .unwrap();
    clock.advance_ms(REPEAT_READ_WINDOW_MS);
    detector
        .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
        .unwrap();

    assert_eq!(detector.history("/f").unwrap()[0].repeat_count, 2);
}

#[test]
fn test_repeat_read_window_measured_from_newest_entry() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let env = env();
    let mut issues = Vec::new();

    detector
        .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
        .unwrap();
    clock.advance_ms(10);
    // Different size: a second fingerprint, stamped at 10ms
    detector
        .detect(&env, &record("/f", OpType::Read, 1, 2048, 20_000), &mut issues)
        .unwrap();
    clock.advance_ms(10);
    // 20ms after the first entry but 10ms after the newest: still one burst
    detector
        .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
        .unwrap();

    let history = detector.history("/f").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].repeat_count, 2);
}

#[test]
fn test_repeat_read_distinguishes_fingerprints() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let env = env();
    let mut issues = Vec::new();

    let variants = [
        record_on("/f", OpType::Read, 1, 4096, 20_000, MAIN_TID, "a"),
        record_on("/f", OpType::Read, 1, 4096, 20_000, MAIN_TID, "b"),
        record_on("/f", OpType::Read, 1, 4096, 20_000, MAIN_TID + 1, "a"),
        record_on("/f", OpType::Read, 1, 1024, 20_000, MAIN_TID, "a"),
    ];
    for info in &variants {
        detector.detect(&env, info, &mut issues).unwrap();
    }

    let history = detector.history("/f").unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|e| e.repeat_count == 1));
}

#[test]
fn test_repeat_read_tracked_path_skips_gate() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let env = env();
    let mut issues = Vec::new();

    detector
        .detect(&env, &record("/f", OpType::Read, 1, 4096, 20_000), &mut issues)
        .unwrap();
    // Cheap read of a path already under observation still counts
    detector
        .detect(&env, &record("/f", OpType::Read, 1, 4096, 5), &mut issues)
        .unwrap();

    assert_eq!(detector.history("/f").unwrap()[0].repeat_count, 2);
}

#[test]
fn test_repeat_read_rejects_empty_path() {
    let clock = Arc::new(ManualClock::new(0));
    let mut detector = repeat_read(&clock);
    let mut issues = Vec::new();
    let err = detector
        .detect(&env(), &record("", OpType::Read, 1, 1, 20_000), &mut issues)
        .unwrap_err();
    assert_eq!(err, DetectError::MalformedRecord("empty path"));
}

// =========================================================================
// DETECTOR SET
// =========================================================================

struct PanickingDetector;

impl Detector for PanickingDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::SmallBuffer
    }

    fn detect(
        &mut self,
        _env: &Env,
        info: &IoInfo,
        issues: &mut Vec<Issue>,
    ) -> Result<(), DetectError> {
        issues.push(Issue::new(
            info,
            crate::issue::IssueDetail::SmallBuffer { average_op_size: 0 },
        ));
        panic!("boom");
    }
}

#[test]
fn test_set_rejects_duplicate_kind() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let mut set = DetectorSet::new();
    assert!(set.register(DetectorKind::MainThread.build(clock.clone())));
    assert!(!set.register(DetectorKind::MainThread.build(clock)));
    assert_eq!(set.len(), 1);
}

#[test]
fn test_set_runs_in_registration_order() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let mut set = DetectorSet::new();
    set.register(DetectorKind::SmallBuffer.build(clock.clone()));
    set.register(DetectorKind::MainThread.build(clock));

    let outcome = set.run(&env(), &record("/f", OpType::Read, 30, 16, 5));
    let kinds: Vec<_> = outcome.issues.iter().map(Issue::kind).collect();
    assert_eq!(kinds, vec![IssueKind::SmallBuffer, IssueKind::MainThreadIo]);
    assert_eq!(outcome.failures, 0);
}

#[test]
fn test_set_contains_panicking_detector() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let mut set = DetectorSet::new();
    set.register(Box::new(PanickingDetector));
    set.register(DetectorKind::MainThread.build(clock));

    let outcome = set.run(&env(), &record("/f", OpType::Read, 1, 16, 5));

    assert_eq!(outcome.failures, 1);
    assert_eq!(outcome.issues.len(), 1);
    assert_eq!(outcome.issues[0].kind(), IssueKind::MainThreadIo);
}

#[test]
fn test_set_resets_failed_detector() {
    let clock = Arc::new(ManualClock::new(0));
    let mut set = DetectorSet::new();
    set.register(Box::new(RepeatReadDetector::new(clock)));

    let env = env();
    set.run(&env, &record("/f", OpType::Read, 1, 4096, 20_000));
    let outcome = set.run(&env, &record("", OpType::Read, 1, 4096, 20_000));
    assert_eq!(outcome.failures, 1);

    // History for "/f" was dropped by the reset: this read is a new baseline
    for _ in 0..(env.repeat_read_threshold - 1) {
        assert!(set.run(&env, &record("/f", OpType::Read, 1, 4096, 20_000)).issues.is_empty());
    }
}

#[test]
fn test_panic_message_extraction() {
    let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "static message");

    let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "formatted 42");
}
