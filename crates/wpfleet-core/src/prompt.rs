//! Confirmation and value-entry capabilities.
//!
//! Mutating commands ask before they touch the fleet and may need a value
//! the operator did not pass on the command line. Both needs go through
//! these traits so the mutation path never reads the terminal directly;
//! the CLI plugs in a terminal-backed implementation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("no value supplied for {0}")]
    Missing(String),

    #[error("prompt failed: {0}")]
    Io(String),
}

/// Asks the operator a yes/no question.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str) -> Result<bool, PromptError>;
}

/// Supplies a value for a named field.
pub trait ValueSource: Send + Sync {
    fn value(&self, prompt: &str) -> Result<String, PromptError>;
}

/// A fixed answer decided ahead of time.
#[derive(Debug, Clone, Copy)]
pub struct PresetAnswer(pub bool);

impl Confirmer for PresetAnswer {
    fn confirm(&self, _prompt: &str) -> Result<bool, PromptError> {
        Ok(self.0)
    }
}

/// A value passed on the command line, or nothing.
#[derive(Debug, Clone, Default)]
pub struct PresetValue(pub Option<String>);

impl ValueSource for PresetValue {
    fn value(&self, prompt: &str) -> Result<String, PromptError> {
        self.0
            .clone()
            .ok_or_else(|| PromptError::Missing(prompt.to_string()))
    }
}
