pub mod framing;
pub mod parser;
pub mod session;
pub mod supervisor;

pub use parser::FrameParser;
pub use session::{ScaleSession, SessionOutcome, SessionSettings};
pub use supervisor::{AggregateResult, SessionSupervisor};
