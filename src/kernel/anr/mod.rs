//! Application-not-responding detection for a cooperating thread.

pub mod dump;
pub mod looper;
pub mod watchdog;

pub use dump::{mark_hung_thread, ProcfsThreadDumper, ThreadDumper};
pub use looper::{LooperThread, Task, WorkQueue};
pub use watchdog::{AnrWatchdog, HangDiagnostic, HangReporter, WatchdogError, WatchdogState};
