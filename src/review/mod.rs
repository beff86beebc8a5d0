//! The review pipeline core: worker pool, dead-letter queue, and the
//! orchestrating pipeline.

mod deadletter;
mod pipeline;
mod pool;

pub use deadletter::{DeadLetter, DeadLetterInfo, DeadLetterQueue};
pub use pipeline::{Pipeline, PipelineConfig, PipelineMetrics};
pub use pool::{
    PoolStats, ReviewFn, ReviewFuture, Task, TaskOutcome, TaskResult, WorkerPool,
};
