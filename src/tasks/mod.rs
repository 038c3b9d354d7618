//! # Spawned tasks.
//!
//! - [`TaskHandle`] - reference to one concurrently running unit of work owned by a node
//! - [`TaskStatus`] - `running | completed | failed | cancelled`

mod handle;

pub use handle::{TaskHandle, TaskStatus};
