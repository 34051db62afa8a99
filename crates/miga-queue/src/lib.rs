pub mod error;
pub mod local;
pub mod memory;
pub mod pg;
pub mod queue;

pub use error::{HandlerError, QueueError, Result};
pub use local::LocalQueue;
pub use queue::{JobHandler, WorkQueue};
