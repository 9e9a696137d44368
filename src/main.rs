use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vigil::kernel::anr::{AnrWatchdog, HangReporter, LooperThread, ProcfsThreadDumper, WorkQueue};
use vigil::kernel::dispatcher::{DebugObserver, EventDispatcher};
use vigil::kernel::event::{FrameSample, RawEvent, RawEventKind, ActionType};
use vigil::kernel::telemetry::recorder::InMemoryBatchWriter;
use vigil::kernel::time::{SystemTimeProvider, TimeProvider, NANOS_PER_MS};
use vigil::VigilConfig;

const FRAME_NANOS: i64 = 16 * NANOS_PER_MS;

fn main() -> anyhow::Result<()> {
    // 1. Logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    // 2. Config: short ANR thresholds so the demo stall is caught
    let mut config = VigilConfig::default();
    config.anr.hang_threshold_ms = 300;
    config.anr.probe_interval_ms = 100;
    config.dispatcher.keep_alive_interval_ms = 250;
    let config = config.with_env_overrides().context("invalid VIGIL_* override")?;

    // 3. Core
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider::new());
    let writer = Arc::new(InMemoryBatchWriter::new());
    let dispatcher = Arc::new(EventDispatcher::start(&config, Arc::clone(&time), writer.clone())?);
    let observer: Arc<dyn DebugObserver> = Arc::new(|views: &[String]| {
        tracing::debug!(?views, "Active views");
    });
    dispatcher.set_debug_observer(Some(observer));

    // 4. Cooperating UI thread + watchdog
    let looper = Arc::new(LooperThread::spawn("vigil-ui")?);
    let queue: Arc<dyn WorkQueue> = looper.clone();
    let reporter: Arc<dyn HangReporter> = dispatcher.clone();
    let watchdog = AnrWatchdog::new(config.anr.clone(), queue, Arc::new(ProcfsThreadDumper), reporter);
    if config.anr.enabled {
        watchdog.start()?;
    }

    tracing::info!("Vigil demo running. Set RUST_LOG=debug for details.");

    // 5. A view with a few janky frames, an action and a long task
    dispatcher.submit(RawEvent::start_view(time.now(), "home", "HomeScreen"))?;
    let mut frame_start = time.now_nanos();
    for i in 0..120 {
        let jank = i % 30 < 3;
        let duration = if jank { 3 * FRAME_NANOS } else { FRAME_NANOS };
        dispatcher.submit(RawEvent::frame(time.now(), FrameSample::new(frame_start, duration, jank)))?;
        frame_start += duration;
    }
    dispatcher.submit(RawEvent::new(
        time.now(),
        RawEventKind::StartAction { action_type: ActionType::Tap, name: "open_settings".into() },
    ))?;
    dispatcher.submit(RawEvent::new(
        time.now(),
        RawEventKind::StopAction { action_type: ActionType::Tap, name: "open_settings".into() },
    ))?;
    dispatcher.submit(RawEvent::long_task(time.now(), 120 * NANOS_PER_MS, "layout"))?;

    // 6. Stall the UI thread past the hang threshold
    looper.post(Box::new(|| thread::sleep(Duration::from_millis(700))));
    thread::sleep(Duration::from_millis(1_200));

    dispatcher.submit(RawEvent::stop_view(time.now(), "home"))?;

    // 7. Orderly shutdown
    watchdog.stop();
    let summary = dispatcher.shutdown()?;
    looper.quit();
    tracing::info!(?summary, stats = ?dispatcher.stats(), "Core shut down");

    // 8. What would be uploaded
    for event in writer.flush_batch() {
        println!("{}", String::from_utf8_lossy(&event.data));
    }
    Ok(())
}
