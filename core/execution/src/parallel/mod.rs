// tessera/core/execution/src/parallel/mod.rs

// Concurrent block execution with key-lock retries

pub mod scheduler;

pub use scheduler::{BlockScheduler, ScheduleStats};
