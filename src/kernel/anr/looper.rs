use parking_lot::Mutex;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The work queue of the thread being watched.
pub trait WorkQueue: Send + Sync {
    /// Enqueues `task`. Returns `false` if the queue no longer accepts work.
    fn post(&self, task: Task) -> bool;

    fn thread_name(&self) -> String;
}

enum LooperMessage {
    Run(Task),
    Quit,
}

/// A dedicated thread running posted tasks one by one, in order.
pub struct LooperThread {
    name: String,
    tx: mpsc::UnboundedSender<LooperMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LooperThread {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<LooperMessage>();
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new().name(thread_name.clone()).spawn(move || {
            info!("Looper '{}' started", thread_name);
            while let Some(message) = rx.blocking_recv() {
                match message {
                    LooperMessage::Run(task) => task(),
                    LooperMessage::Quit => break,
                }
            }
            debug!("Looper '{}' exited", thread_name);
        })?;

        Ok(Self {
            name: name.to_string(),
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stops after the tasks already queued and waits for the thread.
    pub fn quit(&self) {
        let _ = self.tx.send(LooperMessage::Quit);
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl WorkQueue for LooperThread {
    fn post(&self, task: Task) -> bool {
        self.tx.send(LooperMessage::Run(task)).is_ok()
    }

    fn thread_name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for LooperThread {
    fn drop(&mut self) {
        self.quit();
    }
}
