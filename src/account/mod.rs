//! Account input and result output

pub mod sink;
pub mod source;

pub use sink::{write_report, ResultSink, DEFAULT_MAX_DEVICES_FILE, DEFAULT_OUTPUT_FILE};
pub use source::AccountSource;
