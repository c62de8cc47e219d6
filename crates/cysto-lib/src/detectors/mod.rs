pub mod peaks;
pub mod segments;

pub use peaks::*;
pub use segments::*;
