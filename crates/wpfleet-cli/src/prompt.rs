//! Terminal-backed prompts.

use dialoguer::{Confirm, Input};

use wpfleet_core::{Confirmer, PromptError, ValueSource};

/// Asks on the terminal; defaults to "no".
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, prompt: &str) -> Result<bool, PromptError> {
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| PromptError::Io(e.to_string()))
    }
}

/// Reads a value from the terminal.
pub struct TerminalValue;

impl ValueSource for TerminalValue {
    fn value(&self, prompt: &str) -> Result<String, PromptError> {
        Input::<String>::new()
            .with_prompt(prompt)
            .interact_text()
            .map_err(|e| PromptError::Io(e.to_string()))
    }
}
