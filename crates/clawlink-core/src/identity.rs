//! Device identity: the Ed25519 keypair that authenticates this installation.
//!
//! The device id is the lowercase hex SHA-256 fingerprint of the raw public
//! key, so the id and key can never drift apart. The identity is generated
//! once, persisted through an [`IdentityStorage`], and re-imported on every
//! later run. Regenerating it invalidates any approval the gateway granted to
//! the old id, so regeneration only happens when the stored copy is missing or
//! cannot be imported.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{env::Environment, error::IdentityError};

/// Persisted form of a device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    /// Device id (hex SHA-256 of the public key)
    pub id: String,
    /// Standard base64 of the 32-byte public key
    pub public_key: String,
    /// Standard base64 of the 32-byte secret seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Creation time, unix milliseconds
    pub created_at: u64,
}

/// An imported or freshly generated device identity.
#[derive(Clone)]
pub struct DeviceIdentity {
    id: String,
    verifying_key: VerifyingKey,
    signing_key: Option<SigningKey>,
    created_at_ms: u64,
}

impl DeviceIdentity {
    /// Generate a new keypair from environment randomness.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut seed = [0u8; 32];
        env.random_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            id: fingerprint(&verifying_key),
            verifying_key,
            signing_key: Some(signing_key),
            created_at_ms: env.wall_clock_millis(),
        }
    }

    /// Import a persisted identity.
    ///
    /// # Errors
    ///
    /// - `IdentityError::Corrupt` if a key does not decode, the secret seed
    ///   does not derive the stored public key, or the id is not the public
    ///   key's fingerprint
    pub fn import(stored: &StoredIdentity) -> Result<Self, IdentityError> {
        let public = decode_key(&stored.public_key)
            .ok_or_else(|| IdentityError::Corrupt("public key is not 32 base64 bytes".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&public)
            .map_err(|e| IdentityError::Corrupt(format!("public key: {e}")))?;

        if fingerprint(&verifying_key) != stored.id {
            return Err(IdentityError::Corrupt("device id does not match public key".into()));
        }

        let signing_key = match &stored.private_key {
            Some(encoded) => {
                let seed = decode_key(encoded).ok_or_else(|| {
                    IdentityError::Corrupt("private key is not 32 base64 bytes".into())
                })?;
                let signing_key = SigningKey::from_bytes(&seed);
                if signing_key.verifying_key() != verifying_key {
                    return Err(IdentityError::Corrupt("keypair mismatch".into()));
                }
                Some(signing_key)
            },
            None => None,
        };

        Ok(Self { id: stored.id.clone(), verifying_key, signing_key, created_at_ms: stored.created_at })
    }

    /// Persisted form of this identity.
    pub fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            id: self.id.clone(),
            public_key: self.public_key_base64(),
            private_key: self.signing_key.as_ref().map(|key| STANDARD.encode(key.to_bytes())),
            created_at: self.created_at_ms,
        }
    }

    /// Stable device id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Public key as standard base64.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.as_bytes())
    }

    /// Public key.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Creation time, unix milliseconds.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Whether this identity can sign challenges.
    pub fn can_sign(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Sign a handshake challenge.
    ///
    /// The signed message is the UTF-8 string `"<nonce>:<ts>"`. Returns the
    /// 64-byte signature as standard base64.
    ///
    /// # Errors
    ///
    /// - `IdentityError::SigningUnavailable` if only the public key is known
    pub fn sign(&self, nonce: &str, ts: u64) -> Result<String, IdentityError> {
        let key = self.signing_key.as_ref().ok_or(IdentityError::SigningUnavailable)?;
        let signature = key.sign(challenge_message(nonce, ts).as_bytes());
        Ok(STANDARD.encode(signature.to_bytes()))
    }

    /// Drop the secret half, leaving a verify-only identity.
    pub fn without_signing_key(mut self) -> Self {
        self.signing_key = None;
        self
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id", &self.id)
            .field("public_key", &self.public_key_base64())
            .field("can_sign", &self.can_sign())
            .field("created_at_ms", &self.created_at_ms)
            .finish()
    }
}

/// Message bytes covered by the handshake signature.
pub fn challenge_message(nonce: &str, ts: u64) -> String {
    format!("{nonce}:{ts}")
}

fn fingerprint(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn decode_key(encoded: &str) -> Option<[u8; 32]> {
    let bytes = STANDARD.decode(encoded).or_else(|_| URL_SAFE_NO_PAD.decode(encoded)).ok()?;
    bytes.try_into().ok()
}

/// Durable storage for one device identity.
pub trait IdentityStorage {
    /// Read the persisted identity, if any.
    ///
    /// # Errors
    ///
    /// - `IdentityError::Corrupt` if something is stored but unreadable
    /// - `IdentityError::Storage` if the backend itself failed
    fn load(&mut self) -> Result<Option<StoredIdentity>, IdentityError>;

    /// Persist the identity, replacing any previous one.
    fn save(&mut self, identity: &StoredIdentity) -> Result<(), IdentityError>;
}

/// In-memory storage. Counts writes so tests can assert on them.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    stored: Option<StoredIdentity>,
    writes: usize,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with an identity.
    pub fn with_identity(stored: StoredIdentity) -> Self {
        Self { stored: Some(stored), writes: 0 }
    }

    /// Number of `save` calls so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Currently stored identity.
    pub fn stored(&self) -> Option<&StoredIdentity> {
        self.stored.as_ref()
    }
}

impl IdentityStorage for MemoryStorage {
    fn load(&mut self) -> Result<Option<StoredIdentity>, IdentityError> {
        Ok(self.stored.clone())
    }

    fn save(&mut self, identity: &StoredIdentity) -> Result<(), IdentityError> {
        self.stored = Some(identity.clone());
        self.writes += 1;
        Ok(())
    }
}

/// JSON file storage.
///
/// Parent directories are created on save. On unix the file is created with
/// mode `0600`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Storage backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the identity file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStorage for FileStorage {
    fn load(&mut self) -> Result<Option<StoredIdentity>, IdentityError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| IdentityError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    fn save(&mut self, identity: &StoredIdentity) -> Result<(), IdentityError> {
        use std::io::Write as _;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(identity)
            .map_err(|e| IdentityError::Storage(e.to_string()))?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Lazily loads, caches, and persists the device identity.
///
/// The first [`get_identity`](Self::get_identity) either imports the stored
/// identity or generates and saves a new one. Every later call returns the
/// cached value without touching storage.
pub struct IdentityStore<S, E> {
    storage: S,
    env: E,
    cached: Option<DeviceIdentity>,
}

impl<S, E> IdentityStore<S, E>
where
    S: IdentityStorage,
    E: Environment,
{
    /// Create a store over `storage`. Nothing is read until first use.
    pub fn new(storage: S, env: E) -> Self {
        Self { storage, env, cached: None }
    }

    /// Return the device identity, loading or creating it on first call.
    ///
    /// # Errors
    ///
    /// - `IdentityError::Storage` if the storage backend fails. A corrupt
    ///   stored identity is not an error: it is replaced.
    pub fn get_identity(&mut self) -> Result<&DeviceIdentity, IdentityError> {
        let identity = match self.cached.take() {
            Some(identity) => identity,
            None => self.load_or_generate()?,
        };

        Ok(self.cached.insert(identity))
    }

    /// Sign `"<nonce>:<ts>"` with the device key.
    pub fn sign(&mut self, nonce: &str, ts: u64) -> Result<String, IdentityError> {
        self.get_identity()?.sign(nonce, ts)
    }

    /// Forget the cached identity so the next call re-reads storage.
    pub fn clear_cache(&mut self) {
        self.cached = None;
    }

    /// Underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Consume the store, returning its storage.
    pub fn into_storage(self) -> S {
        self.storage
    }

    fn load_or_generate(&mut self) -> Result<DeviceIdentity, IdentityError> {
        match self.storage.load() {
            Ok(Some(stored)) => match DeviceIdentity::import(&stored) {
                Ok(identity) => {
                    tracing::debug!(device_id = %identity.id(), "imported device identity");
                    return Ok(identity);
                },
                Err(e) => tracing::warn!(error = %e, "stored identity rejected, regenerating"),
            },
            Ok(None) => {},
            Err(IdentityError::Corrupt(reason)) => {
                tracing::warn!(%reason, "stored identity unreadable, regenerating");
            },
            Err(e) => return Err(e),
        }

        let identity = DeviceIdentity::generate(&self.env);
        self.storage.save(&identity.to_stored())?;
        tracing::info!(device_id = %identity.id(), "generated device identity");
        Ok(identity)
    }
}
