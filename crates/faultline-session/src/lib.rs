//! Faultline Session Management
//!
//! A session is one debugging run of one test:
//! - `SessionState` is the lifecycle, from `init` to `done` or `error`
//! - `Synchronizer` walks the debugger and console into a known state
//! - `SessionRunner` drives a whole run and always tears the processes down

mod error;
mod runner;
mod session;
mod settings;
mod state;
mod sync;

pub use error::{FailureKind, SessionError, SessionFailure};
pub use runner::{RunRequest, SessionOutcome, SessionRunner};
pub use session::{Session, Stage, Transition};
pub use settings::SessionSettings;
pub use state::SessionState;
pub use sync::{SyncStep, Synchronizer};

pub type Result<T> = std::result::Result<T, SessionError>;
