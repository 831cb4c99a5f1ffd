//! Request dispatcher.
//!
//! Each request runs through authenticate → process → sign and always ends
//! with exactly one fully formed [`Response`]. Authentication failures and
//! user cancellations produce `Success=false` without an error message; any
//! other failure is written to `Response.Error` and reported as a bug.

use std::sync::Arc;

use kphttp_crypto::{AesCbcEngine, AssociationKey, CipherEngine, FieldCodec, sha256_hex};
use tracing::{debug, info, instrument, warn};

use crate::association::{AssociationStore, PutOutcome};
use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::prompt::{ApprovalPrompt, OperatorNotifier, TracingNotifier};
use crate::protocol::{Request, RequestType, Response, ResponseEntry, StringField};
use crate::store::{CredentialEntry, CredentialStore};
use crate::verifier::Verifier;

/// Where an `associate` request is in the approval dialogue.
enum Approval {
    /// Waiting for the operator to name the key.
    Prompting,
    /// A name was chosen; commit it or resolve its conflict.
    Naming(String),
}

pub struct ProtocolEngine {
    cipher: Arc<dyn CipherEngine>,
    credentials: Arc<dyn CredentialStore>,
    associations: AssociationStore,
    prompt: Arc<dyn ApprovalPrompt>,
    notifier: Arc<dyn OperatorNotifier>,
    config: ProtocolConfig,
}

impl ProtocolEngine {
    /// Engine over `credentials` with AES-CBC, log-only bug reports and
    /// default protocol settings.
    pub fn new(credentials: Arc<dyn CredentialStore>, prompt: Arc<dyn ApprovalPrompt>) -> Self {
        Self {
            cipher: Arc::new(AesCbcEngine::new()),
            associations: AssociationStore::new(credentials.clone()),
            credentials,
            prompt,
            notifier: Arc::new(TracingNotifier),
            config: ProtocolConfig::default(),
        }
    }

    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn CipherEngine>) -> Self {
        self.cipher = cipher;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn OperatorNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    pub const fn associations(&self) -> &AssociationStore {
        &self.associations
    }

    fn verifier(&self) -> Verifier<'_> {
        Verifier::new(self.cipher.as_ref())
    }

    /// Handle one request. Never fails: every outcome is a response.
    #[instrument(skip_all, fields(request_type = %request.request_type, id = request.id()))]
    pub async fn handle(&self, request: &Request) -> Response {
        let request_type = request.request_type.to_string();

        let hash = match self.database_hash().await {
            Ok(hash) => Some(hash),
            Err(e) => {
                let mut response = Response::new(request_type.as_str(), None);
                self.fail(&mut response, &e);
                return response;
            }
        };

        let mut response = Response::new(request_type.as_str(), hash);
        response.version.clone_from(&self.config.version);
        response.id = request.id().to_string();

        let outcome = match &request.request_type {
            RequestType::TestAssociate => self.test_associate(request, &mut response).await,
            RequestType::Associate => self.associate(request, &mut response).await,
            RequestType::GetLogins => self.get_logins(request, &mut response).await,
            RequestType::Unknown(_) | RequestType::Missing => {
                warn!("unknown command");
                response.error = Some(format!("Unknown command: {request_type}"));
                Ok(())
            }
        };

        if let Err(e) = outcome {
            self.fail(&mut response, &e);
        }
        response
    }

    fn fail(&self, response: &mut Response, error: &Error) {
        response.success = false;
        response.count = None;
        response.entries = None;
        response.nonce.clear();
        response.verifier.clear();
        response.error = Some(error.to_string());
        if error.is_client_fault() {
            debug!(error = %error, "request rejected");
        } else {
            self.notifier.report_bug(&response.request_type, error);
        }
    }

    async fn database_hash(&self) -> Result<String> {
        let fingerprint = self.credentials.fingerprint().await?;
        Ok(sha256_hex(self.cipher.as_ref(), &fingerprint))
    }

    /// Resolve the stored key for `request.Id` and check the verifier.
    async fn authenticate(&self, request: &Request) -> Result<Option<AssociationKey>> {
        let key = self.associations.lookup(request.id()).await?;
        let verifier = self.verifier();
        let key = key.filter(|k| verifier.authenticate(request, Some(k)));
        if key.is_none() {
            debug!("authentication failed");
        }
        Ok(key)
    }

    async fn test_associate(&self, request: &Request, response: &mut Response) -> Result<()> {
        let Some(key) = self.authenticate(request).await? else {
            response.success = false;
            return Ok(());
        };

        response.success = true;
        self.verifier().sign(response, &key)?;
        Ok(())
    }

    async fn associate(&self, request: &Request, response: &mut Response) -> Result<()> {
        response.success = false;

        let Some(raw_key) = request.key.as_deref() else {
            debug!("associate without a key");
            return Ok(());
        };
        let key = match AssociationKey::from_base64(raw_key) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "associate key is not valid base64");
                return Ok(());
            }
        };
        if !self.verifier().authenticate(request, Some(&key)) {
            debug!("associate verifier rejected");
            return Ok(());
        }

        let Some(name) = self.approve(raw_key, &key).await? else {
            info!("association declined");
            return Ok(());
        };

        response.id = name;
        response.success = true;
        self.verifier().sign(response, &key)?;
        Ok(())
    }

    /// Run the approval dialogue until the key is committed or declined.
    ///
    /// Refusing to overwrite an existing name goes back to the name prompt.
    async fn approve(&self, key_display: &str, key: &AssociationKey) -> Result<Option<String>> {
        let mut step = Approval::Prompting;
        loop {
            step = match step {
                Approval::Prompting => match self.prompt.ask_key_name(key_display).await? {
                    Some(name) if !name.is_empty() => Approval::Naming(name),
                    _ => return Ok(None),
                },
                Approval::Naming(name) => match self.associations.put(&name, key).await? {
                    PutOutcome::Committed => return Ok(Some(name)),
                    PutOutcome::Conflict { existing } => {
                        if self.prompt.ask_overwrite(&existing).await? {
                            self.associations.overwrite(&name, key).await?;
                            return Ok(Some(name));
                        }
                        debug!(existing = %existing, "overwrite refused, asking for another name");
                        Approval::Prompting
                    }
                },
            };
        }
    }

    async fn get_logins(&self, request: &Request, response: &mut Response) -> Result<()> {
        let Some(key) = self.authenticate(request).await? else {
            response.success = false;
            return Ok(());
        };

        let term = self.search_term(request, &key)?;
        let matches = self.credentials.search(&term).await?;

        let iv = self.verifier().sign(response, &key)?;
        if matches.is_empty() {
            debug!("no matching logins");
            response.success = true;
            return Ok(());
        }

        let codec = FieldCodec::new(self.cipher.as_ref(), &key, &iv)?;
        let mut entries = Vec::with_capacity(matches.len());
        for entry in &matches {
            entries.push(self.encrypt_entry(&codec, entry)?);
        }

        info!(count = entries.len(), "returning logins");
        response.count = Some(entries.len());
        response.entries = Some(entries);
        response.success = true;
        Ok(())
    }

    /// Decrypt the URL to search for: `SubmitUrl` unless it is absent or
    /// empty, else `Url`.
    fn search_term(&self, request: &Request, key: &AssociationKey) -> Result<String> {
        let nonce = request.nonce.as_deref().ok_or(Error::MissingField("Nonce"))?;
        let codec = FieldCodec::from_nonce(self.cipher.as_ref(), key, nonce)?;
        let decrypt = |field: Option<&str>| codec.decrypt_opt(field.filter(|s| !s.is_empty()));

        let url = decrypt(request.url.as_deref())?;
        let submit_url = decrypt(request.submit_url.as_deref())?.filter(|s| !s.is_empty());
        submit_url.or(url).ok_or(Error::MissingField("Url"))
    }

    fn encrypt_entry(&self, codec: &FieldCodec<'_>, entry: &CredentialEntry) -> Result<ResponseEntry> {
        let name = codec.encrypt(&entry.title)?;
        let login = codec.encrypt(&entry.username)?;
        let uuid = codec.encrypt(&entry.uuid_hex())?;
        let password = codec.encrypt(&entry.password)?;

        let string_fields = if self.config.return_string_fields {
            let fields = entry
                .fields
                .iter()
                .filter(|(k, _)| k.starts_with(&self.config.string_field_prefix))
                .map(|(k, v)| -> Result<StringField> {
                    Ok(StringField {
                        key: codec.encrypt(k)?,
                        value: codec.encrypt(v)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            (!fields.is_empty()).then_some(fields)
        } else {
            None
        };

        Ok(ResponseEntry {
            name,
            login,
            password,
            uuid,
            string_fields,
        })
    }
}
