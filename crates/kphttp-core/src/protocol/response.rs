//! Outbound response.

use serde::{Deserialize, Serialize};

/// Protocol version reported to clients.
pub const PROTOCOL_VERSION: &str = "1.8.4.1";

/// A response to the browser extension.
///
/// Optional fields serialize as `null` rather than being omitted, matching
/// what existing clients receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub count: Option<usize>,
    pub entries: Option<Vec<ResponseEntry>>,
    pub error: Option<String>,
    /// Hex SHA-256 fingerprint of the open database.
    pub hash: Option<String>,
    pub id: String,
    /// Base64 IV of the server's verifier; empty until signed.
    pub nonce: String,
    pub request_type: String,
    pub success: bool,
    /// Base64 encryption of `nonce` under the session key; empty until signed.
    pub verifier: String,
    pub version: String,
    #[serde(rename = "objectName")]
    pub object_name: String,
}

impl Response {
    pub fn new(request_type: impl Into<String>, hash: Option<String>) -> Self {
        Self {
            count: None,
            entries: None,
            error: None,
            hash,
            id: String::new(),
            nonce: String::new(),
            request_type: request_type.into(),
            success: false,
            verifier: String::new(),
            version: PROTOCOL_VERSION.to_string(),
            object_name: String::new(),
        }
    }

    /// Whether the server's verifier has been attached.
    pub fn is_signed(&self) -> bool {
        !self.nonce.is_empty() && !self.verifier.is_empty()
    }
}

/// One matched credential, every field encrypted under the session IV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEntry {
    pub name: String,
    pub login: String,
    pub password: String,
    pub uuid: String,
    pub string_fields: Option<Vec<StringField>>,
}

/// Custom entry field exported alongside a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StringField {
    pub key: String,
    pub value: String,
}
