//! Conflux foundation
//!
//! Small shared types used by every other crate in the workspace:
//! source spans, parameter trees, verification diagnostics, and the
//! communicator seam for cross-rank collectives.

pub mod comm;
pub mod info;
pub mod params;
pub mod span;

pub use comm::{Communicator, SelfComm};
pub use info::VerifyInfo;
pub use params::{ParamError, Params};
pub use span::Span;
