use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use vigil::config::AnrConfig;
use vigil::kernel::anr::{
    mark_hung_thread, AnrWatchdog, HangDiagnostic, HangReporter, LooperThread, ProcfsThreadDumper, Task, ThreadDumper,
    WatchdogError, WatchdogState, WorkQueue,
};
use vigil::kernel::event::ThreadDump;

#[derive(Default)]
struct CollectingReporter {
    reports: Mutex<Vec<HangDiagnostic>>,
}

impl HangReporter for CollectingReporter {
    fn report_hang(&self, diagnostic: HangDiagnostic) {
        self.reports.lock().push(diagnostic);
    }
}

struct FixedDumper {
    delay: Duration,
}

impl ThreadDumper for FixedDumper {
    fn dump_all(&self) -> Vec<ThreadDump> {
        thread::sleep(self.delay);
        ["main", "test-ui", "vigil-dispatcher"]
            .iter()
            .map(|name| ThreadDump {
                name: name.to_string(),
                state: "waiting".to_string(),
                stack: String::new(),
                crashed: false,
            })
            .collect()
    }
}

/// Takes its time delivering, like a reporter writing to disk.
struct SlowReporter {
    delay: Duration,
    delivered: CollectingReporter,
}

impl HangReporter for SlowReporter {
    fn report_hang(&self, diagnostic: HangDiagnostic) {
        thread::sleep(self.delay);
        self.delivered.report_hang(diagnostic);
    }
}

/// Stops the watchdog it reports for from inside the report callback.
#[derive(Default)]
struct StoppingReporter {
    watchdog: OnceLock<Arc<AnrWatchdog>>,
    reports: Mutex<usize>,
}

impl HangReporter for StoppingReporter {
    fn report_hang(&self, _diagnostic: HangDiagnostic) {
        *self.reports.lock() += 1;
        if let Some(watchdog) = self.watchdog.get() {
            watchdog.stop();
        }
    }
}

/// Accepts tasks and never runs them: a thread that is gone for good.
#[derive(Default)]
struct BlackHoleQueue {
    swallowed: Mutex<Vec<Task>>,
}

impl WorkQueue for BlackHoleQueue {
    fn post(&self, task: Task) -> bool {
        self.swallowed.lock().push(task);
        true
    }

    fn thread_name(&self) -> String {
        "test-ui".to_string()
    }
}

struct ClosedQueue;

impl WorkQueue for ClosedQueue {
    fn post(&self, _task: Task) -> bool {
        false
    }

    fn thread_name(&self) -> String {
        "test-ui".to_string()
    }
}

fn config(hang_threshold_ms: u64) -> AnrConfig {
    AnrConfig { enabled: true, probe_interval_ms: 20, hang_threshold_ms }
}

fn watchdog(
    queue: Arc<dyn WorkQueue>,
    hang_threshold_ms: u64,
    dump_delay: Duration,
) -> (AnrWatchdog, Arc<CollectingReporter>) {
    let reporter = Arc::new(CollectingReporter::default());
    let watchdog = AnrWatchdog::new(
        config(hang_threshold_ms),
        queue,
        Arc::new(FixedDumper { delay: dump_delay }),
        reporter.clone(),
    );
    (watchdog, reporter)
}

#[test]
fn test_responsive_thread_is_never_reported() {
    let looper = Arc::new(LooperThread::spawn("test-ui").expect("spawn looper"));
    let (watchdog, reporter) = watchdog(looper.clone(), 200, Duration::ZERO);

    watchdog.start().expect("start");
    // Short tasks well under the threshold
    for _ in 0..5 {
        looper.post(Box::new(|| thread::sleep(Duration::from_millis(20))));
        thread::sleep(Duration::from_millis(60));
    }
    watchdog.stop();

    assert!(reporter.reports.lock().is_empty(), "No hang, no report");
    assert_eq!(watchdog.reports_emitted(), 0);
}

#[test]
fn test_hang_is_reported_exactly_once_with_one_crashed_thread() {
    let looper = Arc::new(LooperThread::spawn("test-ui").expect("spawn looper"));
    let (watchdog, reporter) = watchdog(looper.clone(), 150, Duration::ZERO);

    // 1. Block the thread before the first probe can run
    looper.post(Box::new(|| thread::sleep(Duration::from_millis(600))));
    watchdog.start().expect("start");

    // 2. Let it hang, recover and run a few healthy cycles
    thread::sleep(Duration::from_millis(1_000));
    watchdog.stop();

    let reports = reporter.reports.lock();
    assert_eq!(reports.len(), 1, "One hang, one report");
    let crashed: Vec<&ThreadDump> = reports[0].threads.iter().filter(|t| t.crashed).collect();
    assert_eq!(crashed.len(), 1, "Exactly one thread is marked crashed");
    assert_eq!(crashed[0].name, "test-ui");
    assert!(reports[0].blocked_for >= Duration::from_millis(150));
    assert!(reports[0].message().contains("test-ui"));
}

#[test]
fn test_permanent_hang_reports_once_and_waits() {
    let queue = Arc::new(BlackHoleQueue::default());
    let (watchdog, reporter) = watchdog(queue.clone(), 50, Duration::ZERO);

    watchdog.start().expect("start");
    thread::sleep(Duration::from_millis(400));

    assert_eq!(reporter.reports.lock().len(), 1, "Same hang must not be reported again");
    assert_eq!(queue.swallowed.lock().len(), 1, "No new probe while the old one is pending");
    assert_eq!(watchdog.state(), WatchdogState::ConfirmedHang);

    watchdog.stop();
    assert_eq!(watchdog.state(), WatchdogState::Stopped);
}

#[test]
fn test_stop_suppresses_in_flight_report() {
    let queue = Arc::new(BlackHoleQueue::default());
    // The capture takes 300ms; stop lands in the middle of it
    let (watchdog, reporter) = watchdog(queue, 50, Duration::from_millis(300));

    watchdog.start().expect("start");
    thread::sleep(Duration::from_millis(150));
    watchdog.stop();
    thread::sleep(Duration::from_millis(300));

    assert!(reporter.reports.lock().is_empty(), "Report must not fire after stop");
    assert_eq!(watchdog.reports_emitted(), 0);
}

#[test]
fn test_slow_reporter_does_not_stall_watched_thread() {
    let looper = Arc::new(LooperThread::spawn("test-ui").expect("spawn looper"));
    let reporter = Arc::new(SlowReporter { delay: Duration::from_millis(500), delivered: CollectingReporter::default() });
    let watchdog = AnrWatchdog::new(
        config(50),
        looper.clone(),
        Arc::new(FixedDumper { delay: Duration::ZERO }),
        reporter.clone(),
    );

    let origin = Instant::now();
    looper.post(Box::new(|| thread::sleep(Duration::from_millis(150))));
    watchdog.start().expect("start");

    // Queued behind the blocking task and the watchdog sentinel
    thread::sleep(Duration::from_millis(20));
    let ran_at: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
    let marker = ran_at.clone();
    looper.post(Box::new(move || *marker.lock() = Some(origin.elapsed())));

    thread::sleep(Duration::from_millis(700));
    watchdog.stop();

    let ran_at = (*ran_at.lock()).expect("marker task ran");
    assert!(ran_at < Duration::from_millis(400), "UI thread waited on the reporter: marker ran at {:?}", ran_at);
    assert_eq!(reporter.delivered.reports.lock().len(), 1);
}

#[test]
fn test_reporter_may_stop_the_watchdog() {
    let queue = Arc::new(BlackHoleQueue::default());
    let reporter = Arc::new(StoppingReporter::default());
    let watchdog = Arc::new(AnrWatchdog::new(
        config(50),
        queue,
        Arc::new(FixedDumper { delay: Duration::ZERO }),
        reporter.clone(),
    ));
    let _ = reporter.watchdog.set(watchdog.clone());

    watchdog.start().expect("start");
    thread::sleep(Duration::from_millis(300));

    assert_eq!(*reporter.reports.lock(), 1);
    assert_eq!(watchdog.state(), WatchdogState::Stopped);
}

#[test]
fn test_prompt_response_leaves_watchdog_resolved() {
    let looper = Arc::new(LooperThread::spawn("test-ui").expect("spawn looper"));
    let reporter = Arc::new(CollectingReporter::default());
    let watchdog = AnrWatchdog::new(
        AnrConfig { enabled: true, probe_interval_ms: 1_000, hang_threshold_ms: 200 },
        looper,
        Arc::new(FixedDumper { delay: Duration::ZERO }),
        reporter.clone(),
    );
    assert_eq!(watchdog.state(), WatchdogState::Idle);

    watchdog.start().expect("start");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(watchdog.state(), WatchdogState::Resolved, "Cooling down after a prompt response");

    watchdog.stop();
    assert!(reporter.reports.lock().is_empty());
}

#[test]
fn test_stop_is_idempotent_and_restart_is_rejected() {
    let looper = Arc::new(LooperThread::spawn("test-ui").expect("spawn looper"));
    let (watchdog, _reporter) = watchdog(looper, 200, Duration::ZERO);

    watchdog.start().expect("start");
    assert!(matches!(watchdog.start(), Err(WatchdogError::AlreadyRunning)));

    watchdog.stop();
    watchdog.stop();
    assert!(matches!(watchdog.start(), Err(WatchdogError::Stopped)));
}

#[test]
fn test_closed_queue_ends_watchdog_without_report() {
    let (watchdog, reporter) = watchdog(Arc::new(ClosedQueue), 50, Duration::ZERO);

    watchdog.start().expect("start");
    thread::sleep(Duration::from_millis(100));

    assert_eq!(watchdog.state(), WatchdogState::Idle);
    assert!(reporter.reports.lock().is_empty());
    watchdog.stop();
}

#[test]
fn test_mark_hung_thread() {
    let dumps = vec![
        ThreadDump { name: "main".into(), state: "runnable".into(), stack: String::new(), crashed: true },
        ThreadDump { name: "a-very-long-thr".into(), state: "waiting".into(), stack: String::new(), crashed: false },
    ];

    // Truncated comm name still matches
    let marked = mark_hung_thread(dumps.clone(), "a-very-long-thread-name");
    let crashed: Vec<&str> = marked.iter().filter(|t| t.crashed).map(|t| t.name.as_str()).collect();
    assert_eq!(crashed, vec!["a-very-long-thr"]);

    // Unknown thread gets a placeholder
    let marked = mark_hung_thread(dumps, "ghost");
    assert_eq!(marked.len(), 3);
    assert_eq!(marked.iter().filter(|t| t.crashed).count(), 1);
    assert_eq!(marked[0].name, "ghost");
}

#[cfg(target_os = "linux")]
#[test]
fn test_procfs_dump_keeps_dumping_thread_backtrace() {
    let dumps = thread::Builder::new()
        .name("dump-caller".to_string())
        .spawn(|| ProcfsThreadDumper.dump_all())
        .expect("spawn")
        .join()
        .expect("dumper panicked");

    let own = dumps.iter().find(|t| t.name == "dump-caller").expect("calling thread listed");
    assert!(!own.stack.is_empty(), "Calling thread carries its own backtrace");
    assert!(dumps.iter().all(|t| !t.crashed));
}
