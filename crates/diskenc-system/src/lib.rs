//! Host-backed implementations of the collaborator traits.
//!
//! Everything that touches processes or the terminal lives here so the core
//! crate can be exercised with in-memory doubles.

mod command;
pub mod keytypes;
pub mod session;
pub mod terminal;
pub mod tpm;

pub use keytypes::ConfiguredKeyTypes;
pub use session::CommandSession;
pub use terminal::{LogProgress, TerminalPresenter, TerminalPrompt};
pub use tpm::HelperTpmUnsealer;
