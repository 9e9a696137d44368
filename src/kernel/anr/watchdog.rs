use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::dump::{mark_hung_thread, ThreadDumper};
use super::looper::WorkQueue;
use crate::config::AnrConfig;
use crate::kernel::event::ThreadDump;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("watchdog was stopped and cannot be restarted")]
    Stopped,
    #[error("watchdog is already running")]
    AlreadyRunning,
    #[error("failed to spawn watchdog thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Idle,
    Probing,
    /// The last probe ran within the threshold; cooling down.
    Resolved,
    ConfirmedHang,
    Stopped,
}

/// Diagnostic emitted once per confirmed hang.
#[derive(Debug, Clone, PartialEq)]
pub struct HangDiagnostic {
    pub thread_name: String,
    pub blocked_for: Duration,
    /// Exactly one entry has `crashed == true`: the hung thread.
    pub threads: Vec<ThreadDump>,
}

impl HangDiagnostic {
    pub fn message(&self) -> String {
        format!(
            "Application Not Responding: '{}' blocked for {}ms",
            self.thread_name,
            self.blocked_for.as_millis()
        )
    }
}

pub trait HangReporter: Send + Sync {
    fn report_hang(&self, diagnostic: HangDiagnostic);
}

#[derive(Debug)]
struct Control {
    state: WatchdogState,
    started: bool,
    stopped: bool,
    // Each probe carries the generation it was posted with; a probe counts
    // only once `serviced_generation` has caught up with it.
    probe_generation: u64,
    serviced_generation: u64,
}

struct Shared {
    config: AnrConfig,
    queue: Arc<dyn WorkQueue>,
    dumper: Arc<dyn ThreadDumper>,
    reporter: Arc<dyn HangReporter>,
    control: Mutex<Control>,
    wake: Condvar,
    reports: AtomicU64,
}

/// Probes a cooperating thread by posting a sentinel task on its queue.
///
/// ```text
/// Idle -> Probing -> Resolved      -> (cooldown) -> Probing
///                 -> ConfirmedHang -> (late probe runs) -> Idle -> (cooldown) -> Probing
/// ```
///
/// The watchdog never waits on the cooperating thread to report: the
/// diagnostic is emitted as soon as the threshold elapses.
pub struct AnrWatchdog {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AnrWatchdog {
    pub fn new(
        config: AnrConfig,
        queue: Arc<dyn WorkQueue>,
        dumper: Arc<dyn ThreadDumper>,
        reporter: Arc<dyn HangReporter>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                queue,
                dumper,
                reporter,
                control: Mutex::new(Control {
                    state: WatchdogState::Idle,
                    started: false,
                    stopped: false,
                    probe_generation: 0,
                    serviced_generation: 0,
                }),
                wake: Condvar::new(),
                reports: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), WatchdogError> {
        {
            let mut control = self.shared.control.lock();
            if control.stopped {
                return Err(WatchdogError::Stopped);
            }
            if control.started {
                return Err(WatchdogError::AlreadyRunning);
            }
            control.started = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("vigil-anr-watchdog".to_string())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.control.lock().started = false;
                Err(WatchdogError::Spawn(e))
            }
        }
    }

    /// Idempotent. After this returns no further probe is posted and no
    /// report fires, including one for a hang already being captured. Blocks
    /// while a report is being delivered, unless called from the reporter.
    pub fn stop(&self) {
        {
            let mut control = self.shared.control.lock();
            if control.stopped {
                return;
            }
            control.stopped = true;
            control.state = WatchdogState::Stopped;
            self.shared.wake.notify_all();
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        info!("ANR watchdog stopped");
    }

    pub fn state(&self) -> WatchdogState {
        self.shared.control.lock().state
    }

    pub fn reports_emitted(&self) -> u64 {
        self.shared.reports.load(Ordering::SeqCst)
    }
}

impl Drop for AnrWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn run(self: Arc<Self>) {
        let threshold = Duration::from_millis(self.config.hang_threshold_ms);
        let cooldown = Duration::from_millis(self.config.probe_interval_ms);
        let thread_name = self.queue.thread_name();
        info!(
            "ANR watchdog started for '{}' (threshold {}ms, interval {}ms)",
            thread_name, self.config.hang_threshold_ms, self.config.probe_interval_ms
        );

        loop {
            // 1. Post the probe
            let generation = {
                let mut control = self.control.lock();
                if control.stopped {
                    break;
                }
                control.probe_generation += 1;
                control.state = WatchdogState::Probing;
                control.probe_generation
            };

            let posted_at = Instant::now();
            let weak: Weak<Shared> = Arc::downgrade(&self);
            let posted = self.queue.post(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_probe_serviced(generation);
                }
            }));
            if !posted {
                warn!("Work queue of '{}' is gone; ANR watchdog exiting", thread_name);
                self.control.lock().state = WatchdogState::Idle;
                break;
            }

            // 2. Wait for it, bounded by the hang threshold
            let deadline = posted_at + threshold;
            let mut control = self.control.lock();
            while control.serviced_generation < generation && !control.stopped {
                if self.wake.wait_until(&mut control, deadline).timed_out() {
                    break;
                }
            }
            if control.stopped {
                break;
            }

            if control.serviced_generation < generation {
                // 3. Confirmed hang: capture without waiting on the hung thread
                control.state = WatchdogState::ConfirmedHang;
                drop(control);

                let threads = mark_hung_thread(self.dumper.dump_all(), &thread_name);
                let diagnostic = HangDiagnostic {
                    thread_name: thread_name.clone(),
                    blocked_for: posted_at.elapsed(),
                    threads,
                };

                if self.control.lock().stopped {
                    debug!("Watchdog stopped while capturing; hang report suppressed");
                    break;
                }
                // CRITICAL: the lock is NOT held here. The cooperating thread takes
                // it to mark its probe serviced and must never wait on a reporter.
                // stop() joins this thread, so no report outlives it.
                error!("{}", diagnostic.message());
                self.reporter.report_hang(diagnostic);
                self.reports.fetch_add(1, Ordering::SeqCst);

                // 4. Block until the stale probe runs; that is the end of the hang
                control = self.control.lock();
                while control.serviced_generation < generation && !control.stopped {
                    self.wake.wait(&mut control);
                }
                if control.stopped {
                    break;
                }
                info!("'{}' recovered after {}ms", thread_name, posted_at.elapsed().as_millis());
                control.state = WatchdogState::Idle;
            } else {
                control.state = WatchdogState::Resolved;
            }

            // 5. Cooldown before the next probe
            let resume_at = Instant::now() + cooldown;
            while !control.stopped {
                if self.wake.wait_until(&mut control, resume_at).timed_out() {
                    break;
                }
            }
            if control.stopped {
                break;
            }
        }
        debug!("ANR watchdog loop exited");
    }

    fn on_probe_serviced(&self, generation: u64) {
        let mut control = self.control.lock();
        if generation > control.serviced_generation {
            control.serviced_generation = generation;
        }
        self.wake.notify_all();
    }
}
