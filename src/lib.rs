pub mod config;
pub mod kernel;

// Re-export the entry points most callers need
pub use config::VigilConfig;
pub use kernel::dispatcher::{DispatchError, EventDispatcher};
pub use kernel::event::{FrameSample, RawEvent, RawEventKind, ThreadDump};
