pub mod config;
pub mod detectors;
pub mod filters;
pub mod io;
pub mod metrics;
pub mod signal;
pub mod simulation;
pub mod sweep;

pub use detectors::*;
pub use metrics::*;
pub use signal::*;
