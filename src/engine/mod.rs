//! Release orchestration.
//!
//! [`ReleaseMachine`] owns the persisted [`crate::state::ReleaseState`] and
//! advances it one step at a time; [`drive`] feeds it operator actions for an
//! interactive session.

mod events;
mod machine;
mod session;

pub use events::ReleaseEvent;
pub use machine::{Collaborators, ReleaseMachine, ReleaseRequest, StepOutcome};
pub use session::{SessionAction, SessionEnd, drive};
