pub mod frame;
pub mod task;

pub use frame::LogFrame;
pub use task::{spawn_datalog, DatalogStatus};
