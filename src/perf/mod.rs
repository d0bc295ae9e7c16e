mod monitor;

pub use monitor::{OperationReport, PerformanceMonitor};
