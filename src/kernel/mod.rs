pub mod anr;
pub mod dispatcher;
pub mod event;
pub mod frames;
pub mod rate;
pub mod state;
pub mod telemetry;
pub mod time;
