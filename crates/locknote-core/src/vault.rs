use crate::gate::AuthOracle;
use crate::models::{Note, NoteBody};
use crate::settings::{
    SettingsError, SettingsStore, BIOMETRIC_ENABLED, PASSCODE_HASH, PASSCODE_SALT,
    PRIVATE_NOTES_ENABLED, SECURITY_ENABLED, VAULT_KEY, VAULT_KEY_VERSION,
};
use crate::telemetry::{Severity, Telemetry};
use aes_gcm::aead::{Aead, KeyInit};
use base64::Engine;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const COMPONENT: &str = "vault";
const ENVELOPE_VERSION: i64 = 1;
const ALGO: &str = "aes-256-gcm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    KeyUnavailable,
    StaleKey { current: u64, found: u64 },
    Malformed(String),
    UnsupportedAlgo(String),
    InvalidIv,
    Rejected,
    Utf8,
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherError::KeyUnavailable => write!(f, "vault key unavailable"),
            CipherError::StaleKey { current, found } => {
                write!(f, "ciphertext sealed with key v{found}, current key is v{current}")
            }
            CipherError::Malformed(detail) => write!(f, "malformed ciphertext: {detail}"),
            CipherError::UnsupportedAlgo(algo) => write!(f, "unsupported algorithm {algo}"),
            CipherError::InvalidIv => write!(f, "invalid iv"),
            CipherError::Rejected => write!(f, "authentication tag mismatch"),
            CipherError::Utf8 => write!(f, "plaintext is not valid utf-8"),
        }
    }
}

impl std::error::Error for CipherError {}

#[derive(Debug)]
pub enum VaultError {
    AlreadyEnabled,
    MissingCredential,
    Settings(SettingsError),
    Cipher(CipherError),
    Payload(serde_json::Error),
}

impl From<SettingsError> for VaultError {
    fn from(err: SettingsError) -> Self {
        Self::Settings(err)
    }
}

impl From<CipherError> for VaultError {
    fn from(err: CipherError) -> Self {
        Self::Cipher(err)
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err)
    }
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::AlreadyEnabled => write!(f, "security is already enabled"),
            VaultError::MissingCredential => {
                write!(f, "a passcode or biometric unlock is required")
            }
            VaultError::Settings(err) => write!(f, "{err}"),
            VaultError::Cipher(err) => write!(f, "{err}"),
            VaultError::Payload(err) => write!(f, "note payload error: {err}"),
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VaultError::Settings(err) => Some(err),
            VaultError::Cipher(err) => Some(err),
            VaultError::Payload(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityOptions {
    pub passcode: Option<String>,
    pub biometric: bool,
    pub private_notes: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CipherEnvelope {
    version: i64,
    algo: Option<String>,
    key_version: u64,
    iv_b64: String,
    ciphertext_b64: String,
}

struct KeySlot {
    version: u64,
    material: Option<[u8; 32]>,
}

/// Owns the note encryption key. Encrypt/decrypt hold the read side of the key
/// slot for their whole duration; enable/disable take the write side.
pub struct CryptoVault {
    settings: Arc<dyn SettingsStore>,
    telemetry: Arc<dyn Telemetry>,
    slot: RwLock<KeySlot>,
}

impl CryptoVault {
    pub fn new(settings: Arc<dyn SettingsStore>, telemetry: Arc<dyn Telemetry>) -> Self {
        let version = stored_key_version(settings.as_ref());
        let material = if settings.flag(SECURITY_ENABLED) {
            load_key_material(settings.as_ref())
        } else {
            None
        };
        if settings.flag(SECURITY_ENABLED) && material.is_none() {
            telemetry.report(
                Severity::Error,
                COMPONENT,
                "security is enabled but no usable key material is stored",
                None,
            );
        }
        Self {
            settings,
            telemetry,
            slot: RwLock::new(KeySlot { version, material }),
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, KeySlot> {
        self.slot.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, KeySlot> {
        self.slot.write().unwrap_or_else(|err| err.into_inner())
    }

    pub fn is_security_enabled(&self) -> bool {
        self.settings.flag(SECURITY_ENABLED)
    }

    pub fn is_biometric_enabled(&self) -> bool {
        self.is_security_enabled() && self.settings.flag(BIOMETRIC_ENABLED)
    }

    pub fn is_private_notes_enabled(&self) -> bool {
        self.is_security_enabled() && self.settings.flag(PRIVATE_NOTES_ENABLED)
    }

    pub fn has_passcode(&self) -> bool {
        matches!(self.settings.get(PASSCODE_HASH), Ok(Some(_)))
    }

    /// Version of the live key, `None` while no key is loaded.
    pub fn key_version(&self) -> Option<u64> {
        let slot = self.read_slot();
        slot.material.map(|_| slot.version)
    }

    pub fn key_fingerprint(&self) -> Option<String> {
        let slot = self.read_slot();
        slot.material.map(|key| hash_bytes(&key))
    }

    pub fn enable(&self, options: &SecurityOptions) -> Result<u64, VaultError> {
        let mut slot = self.write_slot();
        if self.is_security_enabled() && slot.material.is_some() {
            return Err(VaultError::AlreadyEnabled);
        }
        let passcode = options
            .passcode
            .as_deref()
            .filter(|passcode| !passcode.is_empty());
        if passcode.is_none() && !options.biometric {
            return Err(VaultError::MissingCredential);
        }

        let mut key = [0u8; 32];
        rand_core::OsRng.fill_bytes(&mut key);
        let version = stored_key_version(self.settings.as_ref()).max(slot.version) + 1;

        self.settings.set(
            VAULT_KEY,
            &base64::engine::general_purpose::STANDARD.encode(key),
        )?;
        self.settings.set(VAULT_KEY_VERSION, &version.to_string())?;
        match passcode {
            Some(passcode) => {
                let mut salt = [0u8; 16];
                rand_core::OsRng.fill_bytes(&mut salt);
                self.settings.set(
                    PASSCODE_SALT,
                    &base64::engine::general_purpose::STANDARD.encode(salt),
                )?;
                self.settings
                    .set(PASSCODE_HASH, &hash_passcode(&salt, passcode))?;
            }
            None => {
                self.settings.remove(PASSCODE_SALT)?;
                self.settings.remove(PASSCODE_HASH)?;
            }
        }
        self.settings.set_flag(BIOMETRIC_ENABLED, options.biometric)?;
        self.settings
            .set_flag(PRIVATE_NOTES_ENABLED, options.private_notes)?;
        self.settings.set_flag(SECURITY_ENABLED, true)?;

        slot.version = version;
        slot.material = Some(key);
        self.telemetry.report(
            Severity::Info,
            COMPONENT,
            &format!("security enabled with key v{version}"),
            None,
        );
        Ok(version)
    }

    /// Clears key material and flags. Calling it again is a no-op.
    pub fn disable(&self) -> Result<(), VaultError> {
        let mut slot = self.write_slot();
        let was_enabled = slot.material.is_some() || self.is_security_enabled();
        slot.material = None;

        self.settings.set_flag(SECURITY_ENABLED, false)?;
        self.settings.remove(VAULT_KEY)?;
        self.settings.remove(PASSCODE_HASH)?;
        self.settings.remove(PASSCODE_SALT)?;
        self.settings.set_flag(BIOMETRIC_ENABLED, false)?;
        self.settings.set_flag(PRIVATE_NOTES_ENABLED, false)?;

        if was_enabled {
            self.telemetry.report(
                Severity::Info,
                COMPONENT,
                &format!("security disabled, key v{} cleared", slot.version),
                None,
            );
        }
        Ok(())
    }

    pub fn verify_passcode(&self, passcode: &str) -> bool {
        let salt = match self.settings.get(PASSCODE_SALT) {
            Ok(Some(salt)) => salt,
            _ => return false,
        };
        let expected = match self.settings.get(PASSCODE_HASH) {
            Ok(Some(hash)) => hash,
            _ => return false,
        };
        let Ok(salt) = base64::engine::general_purpose::STANDARD.decode(salt) else {
            return false;
        };
        hash_passcode(&salt, passcode) == expected
    }

    pub fn encrypt_text(&self, plaintext: &str) -> Option<String> {
        let slot = self.read_slot();
        let result = match slot.material {
            Some(key) => seal_text(&key, slot.version, plaintext),
            None => Err(CipherError::KeyUnavailable),
        };
        drop(slot);
        match result {
            Ok(ciphertext) => Some(ciphertext),
            Err(err) => {
                self.telemetry
                    .report(Severity::Warning, COMPONENT, "encryption failed", Some(&err));
                None
            }
        }
    }

    pub fn decrypt_text(&self, ciphertext: &str) -> Option<String> {
        match self.try_decrypt_text(ciphertext) {
            Ok(plaintext) => Some(plaintext),
            Err(err) => {
                self.telemetry
                    .report(Severity::Warning, COMPONENT, "decryption failed", Some(&err));
                None
            }
        }
    }

    fn try_decrypt_text(&self, ciphertext: &str) -> Result<String, CipherError> {
        let slot = self.read_slot();
        let key = slot.material.ok_or(CipherError::KeyUnavailable)?;
        open_text(&key, slot.version, ciphertext)
    }

    /// Encrypts title and body. Plaintext is cleared only for fields whose
    /// ciphertext was produced; `encrypted` is set if at least one was.
    pub fn seal_note(&self, note: Note) -> Note {
        let encrypted_title = self.encrypt_text(&note.title);
        let encrypted_content = match note.body.to_payload() {
            Ok(payload) => self.encrypt_text(&payload),
            Err(err) => {
                self.telemetry.report(
                    Severity::Warning,
                    COMPONENT,
                    "note body could not be serialized for encryption",
                    Some(&err),
                );
                None
            }
        };

        let title = if encrypted_title.is_some() {
            String::new()
        } else {
            note.title.clone()
        };
        let body = if encrypted_content.is_some() {
            note.body.cleared()
        } else {
            note.body.clone()
        };

        Note {
            title,
            body,
            encrypted: encrypted_title.is_some() || encrypted_content.is_some(),
            encrypted_title,
            encrypted_content,
            ..note
        }
    }

    /// Read-time projection: decrypted title/body with fallback to the stored
    /// fields. The `encrypted` flag and ciphertext are left as they are.
    pub fn reveal_note(&self, note: &Note) -> Note {
        let mut view = note.clone();
        let mut rejected = false;
        if let Some(ciphertext) = note.encrypted_title.as_deref() {
            match self.decrypt_text(ciphertext) {
                Some(title) => view.title = title,
                None => rejected = true,
            }
        }
        if let Some(ciphertext) = note.encrypted_content.as_deref() {
            match self.decrypt_text(ciphertext) {
                Some(payload) => match NoteBody::from_payload(note.note_type(), &payload) {
                    Ok(body) => view.body = body,
                    Err(err) => {
                        rejected = true;
                        self.telemetry.report(
                            Severity::Warning,
                            COMPONENT,
                            "decrypted note body is not a valid payload",
                            Some(&err),
                        );
                    }
                },
                None => rejected = true,
            }
        }
        if rejected && view.title.is_empty() && view.body.is_empty() {
            self.telemetry.report(
                Severity::Error,
                COMPONENT,
                &format!("note {} is unreadable: ciphertext rejected and no plaintext kept", note.id),
                None,
            );
        }
        view
    }

    /// Strict decryption used by migration. Any failure is an error.
    pub fn unseal_note(&self, note: &Note) -> Result<Note, VaultError> {
        let mut plain = note.clone();
        if let Some(ciphertext) = note.encrypted_title.as_deref() {
            plain.title = self.try_decrypt_text(ciphertext)?;
        }
        if let Some(ciphertext) = note.encrypted_content.as_deref() {
            let payload = self.try_decrypt_text(ciphertext)?;
            plain.body = NoteBody::from_payload(note.note_type(), &payload)?;
        }
        Ok(plain.into_plaintext())
    }
}

/// Authenticates by checking a passcode against the stored hash.
pub struct PasscodeCheck<'a> {
    vault: &'a CryptoVault,
    passcode: &'a str,
}

impl<'a> PasscodeCheck<'a> {
    pub fn new(vault: &'a CryptoVault, passcode: &'a str) -> Self {
        Self { vault, passcode }
    }
}

impl AuthOracle for PasscodeCheck<'_> {
    fn is_authenticated(&self) -> bool {
        self.vault.verify_passcode(self.passcode)
    }
}

fn stored_key_version(settings: &dyn SettingsStore) -> u64 {
    settings
        .get(VAULT_KEY_VERSION)
        .ok()
        .flatten()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(0)
}

fn load_key_material(settings: &dyn SettingsStore) -> Option<[u8; 32]> {
    let encoded = settings.get(VAULT_KEY).ok().flatten()?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    bytes.try_into().ok()
}

fn seal_text(key: &[u8; 32], key_version: u64, plaintext: &str) -> Result<String, CipherError> {
    let key = aes_gcm::Key::<aes_gcm::Aes256Gcm>::from_slice(key);
    let cipher = aes_gcm::Aes256Gcm::new(key);
    let mut iv = [0u8; 12];
    rand_core::OsRng.fill_bytes(&mut iv);
    let nonce = aes_gcm::Nonce::from_slice(&iv);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CipherError::Rejected)?;

    let envelope = CipherEnvelope {
        version: ENVELOPE_VERSION,
        algo: Some(ALGO.to_string()),
        key_version,
        iv_b64: base64::engine::general_purpose::STANDARD.encode(iv),
        ciphertext_b64: base64::engine::general_purpose::STANDARD.encode(ciphertext),
    };
    serde_json::to_string(&envelope).map_err(|err| CipherError::Malformed(err.to_string()))
}

fn open_text(key: &[u8; 32], key_version: u64, payload: &str) -> Result<String, CipherError> {
    let envelope: CipherEnvelope =
        serde_json::from_str(payload).map_err(|err| CipherError::Malformed(err.to_string()))?;
    if let Some(algo) = &envelope.algo {
        if algo != ALGO {
            return Err(CipherError::UnsupportedAlgo(algo.clone()));
        }
    }
    if envelope.key_version != key_version {
        return Err(CipherError::StaleKey {
            current: key_version,
            found: envelope.key_version,
        });
    }
    let iv = base64::engine::general_purpose::STANDARD
        .decode(envelope.iv_b64)
        .map_err(|err| CipherError::Malformed(err.to_string()))?;
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(envelope.ciphertext_b64)
        .map_err(|err| CipherError::Malformed(err.to_string()))?;

    if iv.len() != 12 {
        return Err(CipherError::InvalidIv);
    }

    let key = aes_gcm::Key::<aes_gcm::Aes256Gcm>::from_slice(key);
    let cipher = aes_gcm::Aes256Gcm::new(key);
    let nonce = aes_gcm::Nonce::from_slice(&iv);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| CipherError::Rejected)?;
    String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
}

fn hash_passcode(salt: &[u8], passcode: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(passcode.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
