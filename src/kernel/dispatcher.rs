use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::anr::{HangDiagnostic, HangReporter};
use super::event::{ErrorSource, RawEvent, RawEventKind};
use super::frames::SlowFrameAggregator;
use super::rate::CallRateMonitor;
use super::state::{MonitorSnapshot, MonitorState};
use super::telemetry::event::TelemetryRecord;
use super::telemetry::recorder::EventWriter;
use super::time::TimeProvider;
use crate::config::{ConfigError, DispatcherConfig, DrainPolicy, VigilConfig};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down; {kind} event rejected")]
    ShutDown { kind: &'static str },
    #[error("failed to start dispatcher thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("dispatcher did not drain within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("refusing to start with invalid config: {0}")]
    Config(#[from] ConfigError),
}

/// Receives the names of the active views after every processed event.
pub trait DebugObserver: Send + Sync {
    fn on_active_views(&self, views: &[String]);
}

impl<F> DebugObserver for F
where
    F: Fn(&[String]) + Send + Sync,
{
    fn on_active_views(&self, views: &[String]) {
        self(views)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub processed: u64,
    pub fatal: u64,
    pub rejected: u64,
    pub keep_alives: u64,
    pub discarded: u64,
}

/// What happened to the queue during shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub executed: usize,
    pub discarded: usize,
}

enum Envelope {
    Event(RawEvent),
    Shutdown { done: std::sync::mpsc::SyncSender<DrainSummary> },
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    fatal: AtomicU64,
    rejected: AtomicU64,
    keep_alives: AtomicU64,
    discarded: AtomicU64,
}

struct Core {
    config: DispatcherConfig,
    time: Arc<dyn TimeProvider>,
    state: Mutex<MonitorState>,
    writer: Arc<dyn EventWriter>,
    observer: RwLock<Option<Arc<dyn DebugObserver>>>,
    /// Set once shutdown begins; decides the fate of everything still queued.
    draining: Mutex<Option<DrainPolicy>>,
    counters: Counters,
}

/// Root of the telemetry core.
///
/// # KERNEL LAW
/// Monitor state is mutated under ONE lock, by exactly two kinds of caller:
/// the consumer thread draining the FIFO queue, and a fatal event applied on
/// the submitting thread. They never overlap.
pub struct EventDispatcher {
    core: Arc<Core>,
    tx: mpsc::UnboundedSender<Envelope>,
    accepting: AtomicBool,
    call_rate: CallRateMonitor,
    frames: Arc<SlowFrameAggregator>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn start(
        config: &VigilConfig,
        time: Arc<dyn TimeProvider>,
        writer: Arc<dyn EventWriter>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let frames = Arc::new(SlowFrameAggregator::new(config.frames.clone()));
        let state = MonitorState::new(config.session.clone(), &config.frames, Arc::clone(&frames));

        let core = Arc::new(Core {
            config: config.dispatcher.clone(),
            time: Arc::clone(&time),
            state: Mutex::new(state),
            writer,
            observer: RwLock::new(None),
            draining: Mutex::new(None),
            counters: Counters::default(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker_core = Arc::clone(&core);
        let worker = std::thread::Builder::new()
            .name("vigil-dispatcher".to_string())
            .spawn(move || worker_core.run_worker(rx))?;

        info!(
            "Event dispatcher started (keep-alive every {}ms)",
            config.dispatcher.keep_alive_interval_ms
        );

        Ok(Self {
            core,
            tx,
            accepting: AtomicBool::new(true),
            call_rate: CallRateMonitor::new(config.call_rate.clone(), time),
            frames,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Ordinary events are queued and this returns immediately. Fatal events
    /// are applied on the calling thread before this returns.
    pub fn submit(&self, event: RawEvent) -> Result<(), DispatchError> {
        let kind = event.kind_name();
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(self.reject(kind));
        }

        self.call_rate.track_calls_and_warn_if_necessary(kind);

        if event.is_fatal() {
            self.core.apply_fatal(event);
            return Ok(());
        }

        // Fails only once the consumer has closed the queue during shutdown.
        self.tx.send(Envelope::Event(event)).map_err(|_| self.reject(kind))
    }

    /// Shuts down with the configured drain policy and timeout.
    pub fn shutdown(&self) -> Result<DrainSummary, DispatchError> {
        let config = &self.core.config;
        self.shutdown_with(config.drain_policy, Duration::from_millis(config.shutdown_timeout_ms))
    }

    /// Stops accepting events, then blocks until the consumer has handled
    /// every queued event per `policy`, or `timeout` elapses.
    pub fn shutdown_with(&self, policy: DrainPolicy, timeout: Duration) -> Result<DrainSummary, DispatchError> {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            debug!("Dispatcher already shut down");
            return Ok(DrainSummary::default());
        }
        info!("Dispatcher shutting down ({:?})", policy);
        *self.core.draining.lock() = Some(policy);

        let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);
        if self.tx.send(Envelope::Shutdown { done: done_tx }).is_err() {
            warn!("Dispatcher worker already gone");
            return Ok(DrainSummary::default());
        }

        let summary = done_rx
            .recv_timeout(timeout)
            .map_err(|_| DispatchError::ShutdownTimeout(timeout))?;

        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
        info!(
            "Dispatcher drained: {} executed, {} discarded",
            summary.executed, summary.discarded
        );
        Ok(summary)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn set_debug_observer(&self, observer: Option<Arc<dyn DebugObserver>>) {
        *self.core.observer.write() = observer;
    }

    /// Shared with the frame collaborator, which may feed it directly from
    /// the UI thread instead of going through the queue.
    pub fn frame_aggregator(&self) -> Arc<SlowFrameAggregator> {
        Arc::clone(&self.frames)
    }

    pub fn call_rate_monitor(&self) -> &CallRateMonitor {
        &self.call_rate
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.core.state.lock().snapshot()
    }

    pub fn stats(&self) -> DispatcherStats {
        let c = &self.core.counters;
        DispatcherStats {
            processed: c.processed.load(Ordering::SeqCst),
            fatal: c.fatal.load(Ordering::SeqCst),
            rejected: c.rejected.load(Ordering::SeqCst),
            keep_alives: c.keep_alives.load(Ordering::SeqCst),
            discarded: c.discarded.load(Ordering::SeqCst),
        }
    }

    fn reject(&self, kind: &'static str) -> DispatchError {
        self.core.counters.rejected.fetch_add(1, Ordering::SeqCst);
        warn!("Rejected {} event: dispatcher is shut down", kind);
        DispatchError::ShutDown { kind }
    }
}

impl HangReporter for EventDispatcher {
    fn report_hang(&self, diagnostic: HangDiagnostic) {
        let stack = diagnostic
            .threads
            .iter()
            .find(|t| t.crashed)
            .map(|t| t.stack.clone())
            .filter(|s| !s.is_empty());
        let event = RawEvent::new(
            self.core.time.now(),
            RawEventKind::AddError {
                message: diagnostic.message(),
                source: ErrorSource::Anr,
                stack,
                is_fatal: false,
                threads: diagnostic.threads,
            },
        );
        if let Err(e) = self.submit(event) {
            warn!("Hang report lost: {}", e);
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        if self.is_accepting() {
            if let Err(e) = self.shutdown() {
                warn!("Dispatcher shutdown on drop failed: {}", e);
            }
        }
    }
}

impl Core {
    fn run_worker(self: Arc<Self>, rx: mpsc::UnboundedReceiver<Envelope>) {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Dispatcher runtime failed to start: {}", e);
                return;
            }
        };
        runtime.block_on(self.drive(rx));
    }

    /// Consumer loop. Every received envelope restarts the keep-alive timer,
    /// so at most one keep-alive is ever pending.
    async fn drive(&self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        let keep_alive = Duration::from_millis(self.config.keep_alive_interval_ms);
        let mut summary = DrainSummary::default();

        loop {
            match tokio::time::timeout(keep_alive, rx.recv()).await {
                Ok(Some(Envelope::Event(event))) => self.handle_queued(event, &mut summary),
                Ok(Some(Envelope::Shutdown { done })) => {
                    self.drain(&mut rx, &mut summary);
                    let _ = done.send(summary);
                    break;
                }
                Ok(None) => {
                    debug!("Dispatcher queue closed");
                    break;
                }
                Err(_) => self.apply_keep_alive(),
            }
        }
    }

    /// Events queued ahead of the shutdown marker are still subject to the
    /// drain policy once shutdown has begun.
    fn handle_queued(&self, event: RawEvent, summary: &mut DrainSummary) {
        let policy = *self.draining.lock();
        match policy {
            None => self.apply_ordinary(event),
            Some(DrainPolicy::ExecutePending) => {
                self.apply_ordinary(event);
                summary.executed += 1;
            }
            Some(DrainPolicy::DiscardPending) => {
                debug!("Discarding queued {} event", event.kind_name());
                self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                summary.discarded += 1;
            }
        }
    }

    fn drain(&self, rx: &mut mpsc::UnboundedReceiver<Envelope>, summary: &mut DrainSummary) {
        // From here on, racing submitters get an error instead of a silent drop.
        rx.close();
        let mut waiters = Vec::new();

        while let Ok(envelope) = rx.try_recv() {
            match envelope {
                Envelope::Event(event) => self.handle_queued(event, summary),
                Envelope::Shutdown { done } => waiters.push(done),
            }
        }
        for waiter in waiters {
            let _ = waiter.send(*summary);
        }
    }

    fn apply_ordinary(&self, event: RawEvent) {
        let active_views = {
            let mut state = self.state.lock();
            let records = state.apply(&event);
            self.write_all(&records);
            state.active_view_names()
        };
        self.counters.processed.fetch_add(1, Ordering::SeqCst);

        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_active_views(&active_views);
        }
    }

    /// CRITICAL: runs on the submitting thread. The process may die as soon
    /// as this returns, so records are written before returning.
    fn apply_fatal(&self, event: RawEvent) {
        error!("Applying fatal {} event synchronously", event.kind_name());
        let mut state = self.state.lock();
        let records = state.apply(&event);
        self.write_all(&records);
        drop(state);
        self.counters.fatal.fetch_add(1, Ordering::SeqCst);
    }

    fn apply_keep_alive(&self) {
        debug!("Queue idle; applying keep-alive");
        let event = RawEvent::keep_alive(self.time.now());
        let mut state = self.state.lock();
        let records = state.apply(&event);
        self.write_all(&records);
        drop(state);
        self.counters.keep_alives.fetch_add(1, Ordering::SeqCst);
    }

    /// Called with the state lock held, so records reach the writer in the
    /// order they were produced.
    fn write_all(&self, records: &[TelemetryRecord]) {
        for record in records {
            self.writer.write(record);
        }
    }
}
