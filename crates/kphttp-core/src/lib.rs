//! `kphttp` Core Library
//!
//! The KeePassHTTP authentication and field-encryption engine:
//! - Request/response wire model
//! - Association store on top of a credential database
//! - Verifier checks and response signing
//! - Protocol engine dispatching `test-associate`, `associate` and `get-logins`
//! - Host that delays requests until a database is open
//! - Configuration resolution and tracing setup

pub mod association;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod prompt;
pub mod protocol;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tracing_init;
pub mod verifier;

pub use association::{AssociationStore, PutOutcome};
pub use config::Config;
pub use engine::ProtocolEngine;
pub use error::{Error, Result};
pub use host::Host;
pub use prompt::{ApprovalPrompt, DenyAll, OperatorNotifier, TracingNotifier};
pub use protocol::{Request, RequestType, Response, ResponseEntry, StringField};
pub use store::{CredentialEntry, CredentialStore, Database, JsonCredentialStore};
pub use verifier::Verifier;
