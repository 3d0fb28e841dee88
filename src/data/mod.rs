//! Column bookkeeping and CSV storage.
pub mod registry;
pub mod storage;

pub use registry::{Column, ColumnRegistry};
pub use storage::{Recorder, Row};
