//! Inbound request.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Command carried in `RequestType`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum RequestType {
    TestAssociate,
    Associate,
    GetLogins,
    /// Any command this engine does not implement, kept verbatim.
    Unknown(String),
    /// `RequestType` was missing from the request.
    #[default]
    Missing,
}

impl RequestType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TestAssociate => "test-associate",
            Self::Associate => "associate",
            Self::GetLogins => "get-logins",
            Self::Unknown(other) => other.as_str(),
            Self::Missing => "",
        }
    }
}

impl From<String> for RequestType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "test-associate" => Self::TestAssociate,
            "associate" => Self::Associate,
            "get-logins" => Self::GetLogins,
            "" => Self::Missing,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Option<String>> for RequestType {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Missing, Self::from)
    }
}

impl From<&str> for RequestType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<RequestType> for String {
    fn from(value: RequestType) -> Self {
        match value {
            RequestType::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request from the browser extension.
///
/// Every field is optional on the wire; handlers decide what a missing
/// field means (usually an authentication failure).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    #[serde(default)]
    pub request_type: RequestType,
    /// Association name whose key signs this request.
    #[serde(default)]
    pub id: Option<String>,
    /// Base64 IV of the client's verifier.
    #[serde(default)]
    pub nonce: Option<String>,
    /// Base64 AES-CBC encryption of `nonce` under the shared key.
    #[serde(default)]
    pub verifier: Option<String>,
    /// Base64 raw key proposed by an `associate` request.
    #[serde(default)]
    pub key: Option<String>,
    /// Encrypted page URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Encrypted form action URL.
    #[serde(default)]
    pub submit_url: Option<String>,
}

impl Request {
    /// Association name, or `""` when absent.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }
}
