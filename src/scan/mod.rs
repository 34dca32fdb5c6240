pub mod pool;

pub use pool::{BatchPool, ItemFailure, ItemProgress, ScanError, ScanOutcome, ScanWarning};
