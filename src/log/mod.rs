//! Binary log file format: codec, writer and replay reader (spec §4.9-4.11).

pub mod codec;
pub mod logger;
pub mod reader;

pub use logger::{LogStats, Logger};
pub use reader::{LogReader, LogSlaveInformant};
