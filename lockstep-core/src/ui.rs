//! The capability the core uses to talk to a user.
//!
//! The sync engine has to prompt (peer passphrases, host-key trust,
//! conflict resolution) but must stay testable without a terminal, so
//! everything interactive goes through this small trait. End-of-input
//! and interrupts are ordinary values, not panics or signals.

use thiserror::Error;

/// Why a prompt produced no input.
#[derive(Error, Debug)]
pub enum PromptError {
    /// End of input (ctrl-d / closed stdin).
    #[error("end of input")]
    End,

    /// The user interrupted (ctrl-c).
    #[error("interrupted")]
    Interrupt,

    #[error("prompt io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for prompts
pub type PromptResult = std::result::Result<String, PromptError>;

/// Minimal user-interaction capability threaded through the sync engine.
pub trait UiPort {
    /// Read a line of input.
    fn prompt(&mut self, msg: &str) -> PromptResult;

    /// Read a line without echoing it (passphrases).
    fn prompt_hidden(&mut self, msg: &str) -> PromptResult;

    fn info(&mut self, msg: &str);

    fn error(&mut self, msg: &str);

    /// Yes/no question; anything but `y`/`Y` is no.
    fn confirm(&mut self, msg: &str) -> std::result::Result<bool, PromptError> {
        let line = self.prompt(msg)?;
        Ok(matches!(line.trim(), "y" | "Y"))
    }
}
