//! Persistent task queue with partial-result accounting.
//!
//! Tasks are batches of 1..10 images bound for one target language. The
//! queue, the claim set, and the task records all live in the coordination
//! store, so any instance in the cluster can claim and finish work created
//! by any other. Each image's outcome is written back independently as a
//! partial result; the task turns terminal only when every index has.
//!
//! Ordering is FIFO under a single consumer; with many consumers the
//! interleaving across workers is undefined, and no cross-task ordering is
//! promised to clients. Delivery is at-least-once: the stale-task reclaimer
//! ([`spawn_reclaimer`]) times out claims whose worker died, and partial
//! writes are idempotent so replays converge on the same record.

mod config;
mod error;
mod manager;
mod model;
mod reclaimer;

pub use config::{TaskConfig, TaskConfigBuilder};
pub use error::TaskError;
pub use manager::{ImageOutcome, QueueStats, TaskManager, PROCESSING_KEY, QUEUE_KEY};
pub use model::{ImageResult, Language, Task, TaskStatus};
pub use reclaimer::spawn_reclaimer;
