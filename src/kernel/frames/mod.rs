//! UI slowness aggregation: slow frame intervals, frozen frames and the
//! long-task (ANR) duration ratio of the current view.

pub mod aggregator;
pub mod report;

pub use aggregator::{SlowFrameAggregator, ViewTimeline};
pub use report::{SlowFrameRecord, SlowFramesReport};
