//! Test doubles and a scripted browser-extension client.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kphttp_crypto::{AesCbcEngine, AssociationKey, CipherEngine, CryptoError, FieldCodec};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::prompt::{ApprovalPrompt, OperatorNotifier};
use crate::protocol::{Request, RequestType, Response};
use crate::store::{CredentialEntry, CredentialStore, Database, JsonCredentialStore};
use crate::verifier::Verifier;

type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Prompt that replays queued answers and records what it was shown.
///
/// An exhausted queue declines.
#[derive(Default)]
pub struct ScriptedPrompt {
    names: Mutex<VecDeque<Option<String>>>,
    overwrites: Mutex<VecDeque<bool>>,
    shown_keys: Mutex<Vec<String>>,
    overwrite_asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next name prompt with `name`.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.names.get_mut().push_back(Some(name.to_string()));
        self
    }

    /// Dismiss the next name prompt.
    #[must_use]
    pub fn cancel(mut self) -> Self {
        self.names.get_mut().push_back(None);
        self
    }

    /// Answer the next overwrite question.
    #[must_use]
    pub fn overwrite(mut self, answer: bool) -> Self {
        self.overwrites.get_mut().push_back(answer);
        self
    }

    /// Key texts passed to `ask_key_name`, in call order.
    pub async fn shown_keys(&self) -> Vec<String> {
        self.shown_keys.lock().await.clone()
    }

    /// Names passed to `ask_overwrite`, in call order.
    pub async fn overwrite_asked(&self) -> Vec<String> {
        self.overwrite_asked.lock().await.clone()
    }
}

#[async_trait]
impl ApprovalPrompt for ScriptedPrompt {
    async fn ask_key_name(&self, key_display: &str) -> Result<Option<String>> {
        self.shown_keys.lock().await.push(key_display.to_string());
        Ok(self.names.lock().await.pop_front().flatten())
    }

    async fn ask_overwrite(&self, existing: &str) -> Result<bool> {
        self.overwrite_asked.lock().await.push(existing.to_string());
        Ok(self.overwrites.lock().await.pop_front().unwrap_or(false))
    }
}

/// Collects bug reports as `(request_type, message)` pairs.
#[derive(Default)]
pub struct RecordingNotifier {
    reports: StdMutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl OperatorNotifier for RecordingNotifier {
    fn report_bug(&self, request_type: &str, error: &Error) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((request_type.to_string(), error.to_string()));
        }
    }
}

/// Store whose writes and searches fail.
///
/// With `fingerprint_fails` the database identity is unavailable too.
pub struct FailingStore {
    inner: JsonCredentialStore,
    fingerprint_fails: bool,
}

impl FailingStore {
    pub fn new(db: Database) -> Self {
        Self {
            inner: JsonCredentialStore::in_memory(db),
            fingerprint_fails: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            inner: JsonCredentialStore::in_memory(Database::new()),
            fingerprint_fails: true,
        }
    }

    fn failure() -> Error {
        Error::Store("database is locked".to_string())
    }
}

#[async_trait]
impl CredentialStore for FailingStore {
    async fn fingerprint(&self) -> Result<String> {
        if self.fingerprint_fails {
            return Err(Self::failure());
        }
        self.inner.fingerprint().await
    }

    async fn find_association(&self, name: &str) -> Result<Option<AssociationKey>> {
        self.inner.find_association(name).await
    }

    async fn association_names(&self) -> Result<Vec<String>> {
        self.inner.association_names().await
    }

    async fn put_association(&self, _name: &str, _key: &AssociationKey) -> Result<()> {
        Err(Self::failure())
    }

    async fn remove_association(&self, _name: &str) -> Result<bool> {
        Err(Self::failure())
    }

    async fn replace_association(&self, _name: &str, _key: &AssociationKey) -> Result<()> {
        Err(Self::failure())
    }

    async fn search(&self, _term: &str) -> Result<Vec<CredentialEntry>> {
        Err(Self::failure())
    }
}

/// AES-CBC engine whose encryptions start failing after a set number of
/// successful calls. Decryption, randomness and hashing keep working.
pub struct FailingCipher {
    inner: AesCbcEngine,
    remaining: AtomicUsize,
}

impl FailingCipher {
    /// Let the first `successes` encryptions through.
    pub const fn after(successes: usize) -> Self {
        Self {
            inner: AesCbcEngine::new(),
            remaining: AtomicUsize::new(successes),
        }
    }
}

impl CipherEngine for FailingCipher {
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> CryptoResult<Vec<u8>> {
        let allowed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(CryptoError::EncryptionFailed("cipher unavailable".into()));
        }
        self.inner.encrypt(plaintext, key, iv)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8], iv: &[u8]) -> CryptoResult<Vec<u8>> {
        self.inner.decrypt(ciphertext, key, iv)
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        self.inner.random_bytes(len)
    }

    fn sha256(&self, data: &str) -> [u8; 32] {
        self.inner.sha256(data)
    }
}

/// A credential as the client sees it after decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainEntry {
    pub name: String,
    pub login: String,
    pub password: String,
    pub uuid: String,
    pub string_fields: Vec<(String, String)>,
}

/// Browser-extension side of the protocol.
pub struct TestClient {
    engine: AesCbcEngine,
    key: AssociationKey,
    id: String,
}

impl TestClient {
    /// A client with a freshly generated key, known to the server as `id`.
    pub fn new(id: &str) -> Self {
        let engine = AesCbcEngine::new();
        let key = AssociationKey::generate(&engine);
        Self {
            engine,
            key,
            id: id.to_string(),
        }
    }

    pub fn with_key(id: &str, key: AssociationKey) -> Self {
        Self {
            engine: AesCbcEngine::new(),
            key,
            id: id.to_string(),
        }
    }

    pub const fn key(&self) -> &AssociationKey {
        &self.key
    }

    pub fn key_base64(&self) -> String {
        self.key.to_base64()
    }

    /// A request carrying `Id`, a fresh `Nonce` and its `Verifier`.
    pub fn signed(&self, request_type: RequestType) -> CryptoResult<Request> {
        let challenge = Verifier::new(&self.engine).challenge(&self.key)?;
        Ok(Request {
            request_type,
            id: Some(self.id.clone()),
            nonce: Some(challenge.nonce),
            verifier: Some(challenge.verifier),
            ..Request::default()
        })
    }

    pub fn test_associate(&self) -> CryptoResult<Request> {
        self.signed(RequestType::TestAssociate)
    }

    /// An `associate` request offering this client's key.
    pub fn associate(&self) -> CryptoResult<Request> {
        let mut request = self.signed(RequestType::Associate)?;
        request.id = None;
        request.key = Some(self.key_base64());
        Ok(request)
    }

    /// A `get-logins` request with `url` and `submit_url` encrypted under
    /// the request nonce.
    pub fn get_logins(&self, url: Option<&str>, submit_url: Option<&str>) -> CryptoResult<Request> {
        let mut request = self.signed(RequestType::GetLogins)?;
        let nonce = request.nonce.clone().unwrap_or_default();
        let codec = FieldCodec::from_nonce(&self.engine, &self.key, &nonce)?;
        request.url = codec.encrypt_opt(url)?;
        request.submit_url = codec.encrypt_opt(submit_url)?;
        Ok(request)
    }

    /// Whether `response` carries a valid server verifier for this key.
    pub fn verify(&self, response: &Response) -> bool {
        Verifier::new(&self.engine).verify_response(response, &self.key)
    }

    /// Decrypt every entry under the response nonce.
    pub fn decrypt_entries(&self, response: &Response) -> CryptoResult<Vec<PlainEntry>> {
        let codec = FieldCodec::from_nonce(&self.engine, &self.key, &response.nonce)?;
        response
            .entries
            .iter()
            .flatten()
            .map(|entry| -> CryptoResult<PlainEntry> {
                let string_fields = entry
                    .string_fields
                    .iter()
                    .flatten()
                    .map(|f| -> CryptoResult<(String, String)> {
                        Ok((codec.decrypt(&f.key)?, codec.decrypt(&f.value)?))
                    })
                    .collect::<CryptoResult<Vec<_>>>()?;
                Ok(PlainEntry {
                    name: codec.decrypt(&entry.name)?,
                    login: codec.decrypt(&entry.login)?,
                    password: codec.decrypt(&entry.password)?,
                    uuid: codec.decrypt(&entry.uuid)?,
                    string_fields,
                })
            })
            .collect()
    }
}
