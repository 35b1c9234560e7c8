pub mod retention;
pub mod sink;

pub use retention::RetentionSweeper;
pub use sink::{LogRecord, LogSink};
