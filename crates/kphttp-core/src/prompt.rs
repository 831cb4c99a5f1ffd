//! Human-facing collaborators: association approval and bug reports.

use async_trait::async_trait;
use tracing::error;

use crate::error::{Error, Result};

/// Asks the operator to approve new key associations.
///
/// Calls may take arbitrarily long; the engine waits for an answer.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    /// Ask for a name for the key shown as `key_display`.
    ///
    /// `None` (or an empty name) means the operator declined.
    async fn ask_key_name(&self, key_display: &str) -> Result<Option<String>>;

    /// Ask whether the association named `existing` may be replaced.
    async fn ask_overwrite(&self, existing: &str) -> Result<bool>;
}

/// Receives failures that indicate a bug rather than a protocol outcome.
pub trait OperatorNotifier: Send + Sync {
    fn report_bug(&self, request_type: &str, error: &Error);
}

/// Reports bugs to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl OperatorNotifier for TracingNotifier {
    fn report_bug(&self, request_type: &str, error: &Error) {
        error!(request_type, error = %error, "KeePassHttp request failed unexpectedly");
    }
}

/// Declines every association. Used for non-interactive hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl ApprovalPrompt for DenyAll {
    async fn ask_key_name(&self, _key_display: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn ask_overwrite(&self, _existing: &str) -> Result<bool> {
        Ok(false)
    }
}
