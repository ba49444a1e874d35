//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{handle_command, send_status, HandleOutcome, HandlerContext};
pub use machine::{ClientInfo, NspState, NspTransfer, ServerState};
