//! Remote shell sessions
//!
//! A connection owns one [`SessionHandler`], which holds the
//! [`SessionRegistry`] of shells started over that connection. Shell output
//! is read by blocking relay tasks and handed back to the connection loop
//! as [`RelayEvent`]s.

mod handler;
mod registry;
mod relay;

pub use handler::{SessionHandler, SessionSettings, SHELL_STARTED};
pub use registry::{ActiveSession, SessionRegistry};
pub use relay::{spawn_output_relay, RelayEvent};
