//! Terminal approval prompt.
//!
//! Dialogs are drawn on stderr so stdout stays reserved for responses.

use async_trait::async_trait;
use dialoguer::console::Term;
use dialoguer::{Confirm, Input};
use kphttp_core::{ApprovalPrompt, Error, Result};

/// Asks the operator at the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

fn prompt_error(e: impl std::fmt::Display) -> Error {
    Error::Prompt(e.to_string())
}

/// Ask for a key name. An empty answer declines.
pub fn prompt_key_name(key_display: &str) -> Result<Option<String>> {
    let term = Term::stderr();
    term.write_line("")?;
    term.write_line("A client asked to be associated with the open database.")?;
    term.write_line(&format!("Key: {key_display}"))?;
    term.write_line("Give it a unique name to allow access, or leave empty to refuse.")?;

    let name: String = Input::new()
        .with_prompt("Key name")
        .allow_empty(true)
        .interact_text_on(&term)
        .map_err(prompt_error)?;
    let name = name.trim().to_string();
    Ok((!name.is_empty()).then_some(name))
}

/// Ask whether the association `existing` may be replaced.
pub fn prompt_overwrite(existing: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(format!(
            "An association named \"{existing}\" already exists. Overwrite it?"
        ))
        .default(false)
        .interact_on(&Term::stderr())
        .map_err(prompt_error)
}

#[async_trait]
impl ApprovalPrompt for TerminalPrompt {
    async fn ask_key_name(&self, key_display: &str) -> Result<Option<String>> {
        let key_display = key_display.to_string();
        tokio::task::spawn_blocking(move || prompt_key_name(&key_display))
            .await
            .map_err(prompt_error)?
    }

    async fn ask_overwrite(&self, existing: &str) -> Result<bool> {
        let existing = existing.to_string();
        tokio::task::spawn_blocking(move || prompt_overwrite(&existing))
            .await
            .map_err(prompt_error)?
    }
}
