pub mod controller;
pub mod universe;

pub use controller::{FailureSink, ProgressSink, ScanReport, ScanRequest, ScreenerApp};
pub use universe::{load_universe, normalize_symbols};
