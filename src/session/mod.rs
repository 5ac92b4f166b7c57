//! Meeting sessions.
//!
//! A session tracks one meeting from the join trigger through transcript delivery.
//! Records live in an in-memory registry that rewrites a JSON snapshot on every change.

pub mod model;
pub mod registry;
pub mod store;

pub use model::{meeting_ref_from_url, Session, SessionState, SessionSummary};
pub use registry::{SessionRegistry, StateChange};
pub use store::{SessionMap, SessionStore};
