//! KeePassHTTP wire types.
//!
//! Field names and encodings are a compatibility contract with existing
//! browser extensions: PascalCase JSON keys, base64 for binary material.

mod request;
mod response;

pub use request::{Request, RequestType};
pub use response::{PROTOCOL_VERSION, Response, ResponseEntry, StringField};
