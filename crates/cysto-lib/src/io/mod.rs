pub mod report;
pub mod session;
pub mod text;

pub use session::{read_session, IngestError, Session};
