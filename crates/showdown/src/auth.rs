//! Host key and facilitator credentials.
//!
//! - The host key is an Ed25519 PKCS#8 document, base64-encoded on disk.
//!   The server signs every connection's challenge with it.
//! - Facilitator credentials are Ed25519 public keys in OpenSSH
//!   `authorized_keys` form (`ssh-ed25519 <blob> [comment]`). A client proves
//!   possession by signing the connection challenge bound to the host key.
//!
//! Failures reading or parsing the authorized-keys file never abort a
//! connection; they mean "no facilitator credential accepted".

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, warn};

/// Key type accepted for both host and facilitator keys.
pub const ED25519_KEY_TYPE: &str = "ssh-ed25519";

/// Domain separator for everything signed during the handshake.
const SIGNING_CONTEXT: &[u8] = b"showdown-auth-v1";

const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Challenge length in bytes.
pub const CHALLENGE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("malformed key: {0}")]
    Malformed(&'static str),

    #[error("host key is not a valid Ed25519 PKCS#8 document")]
    InvalidHostKey,

    #[error("random number generator failure")]
    Rng,
}

/// Raw Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; ED25519_PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let raw: [u8; ED25519_PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::Malformed("Ed25519 public key must be 32 bytes"))?;
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse the `ssh-ed25519 <blob>` prefix of an authorized-keys line.
    /// Anything after the blob is a comment and ignored.
    pub fn parse_openssh(line: &str) -> Result<Self, KeyError> {
        let mut fields = line.split_whitespace();
        let key_type = fields.next().ok_or(KeyError::Malformed("empty key line"))?;
        if key_type != ED25519_KEY_TYPE {
            return Err(KeyError::UnsupportedKeyType(key_type.to_string()));
        }
        let blob = fields.next().ok_or(KeyError::Malformed("missing key blob"))?;
        Self::from_wire_blob(&STANDARD.decode(blob)?)
    }

    /// Decode the SSH wire encoding: `string key_type || string key`.
    fn from_wire_blob(blob: &[u8]) -> Result<Self, KeyError> {
        let (key_type, rest) = read_ssh_string(blob)?;
        if key_type != ED25519_KEY_TYPE.as_bytes() {
            return Err(KeyError::UnsupportedKeyType(
                String::from_utf8_lossy(key_type).into_owned(),
            ));
        }
        let (key, rest) = read_ssh_string(rest)?;
        if !rest.is_empty() {
            return Err(KeyError::Malformed("trailing bytes after key"));
        }
        Self::from_bytes(key)
    }

    fn to_wire_blob(self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(4 + ED25519_KEY_TYPE.len() + 4 + ED25519_PUBLIC_KEY_LEN);
        write_ssh_string(&mut blob, ED25519_KEY_TYPE.as_bytes());
        write_ssh_string(&mut blob, &self.0);
        blob
    }

    /// Render as an authorized-keys line without comment.
    #[must_use]
    pub fn to_openssh(&self) -> String {
        format!("{ED25519_KEY_TYPE} {}", STANDARD.encode(self.to_wire_blob()))
    }

    /// Check `signature` over `message` against this key.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&signature::ED25519, &self.0)
            .verify(message, signature)
            .is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

fn read_ssh_string(input: &[u8]) -> Result<(&[u8], &[u8]), KeyError> {
    let len_bytes: [u8; 4] = input
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(KeyError::Malformed("truncated length prefix"))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let end = 4usize
        .checked_add(len)
        .ok_or(KeyError::Malformed("length overflow"))?;
    let value = input
        .get(4..end)
        .ok_or(KeyError::Malformed("truncated string"))?;
    let rest = input.get(end..).unwrap_or_default();
    Ok((value, rest))
}

fn write_ssh_string(out: &mut Vec<u8>, value: &[u8]) {
    // Key material here is at most a few dozen bytes.
    #[allow(clippy::cast_possible_truncation)]
    let len = value.len() as u32;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value);
}

/// Random per-connection challenge.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Challenge([u8; CHALLENGE_LEN]);

impl Challenge {
    pub fn random(rng: &SystemRandom) -> Result<Self, KeyError> {
        let mut bytes = [0u8; CHALLENGE_LEN];
        rng.fill(&mut bytes).map_err(|_| KeyError::Rng)?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; CHALLENGE_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Bytes the host signs in the greeting.
    #[must_use]
    pub fn host_message(&self) -> Vec<u8> {
        [SIGNING_CONTEXT, &self.0].concat()
    }

    /// Bytes a client signs to present a credential.
    #[must_use]
    pub fn credential_message(&self, host_key: &PublicKey) -> Vec<u8> {
        [SIGNING_CONTEXT, &self.0, host_key.as_bytes()].concat()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", self.to_hex())
    }
}

/// The server's signing identity.
pub struct HostKey {
    pair: Ed25519KeyPair,
}

impl HostKey {
    /// Load a base64-encoded PKCS#8 document from `path`.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let encoded = std::fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_base64(&SecretString::from(encoded))
    }

    pub fn from_base64(encoded: &SecretString) -> Result<Self, KeyError> {
        let pkcs8 = STANDARD.decode(encoded.expose_secret().trim())?;
        Self::from_pkcs8(&pkcs8)
    }

    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, KeyError> {
        let pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8)
            .map_err(|_| KeyError::InvalidHostKey)?;
        Ok(Self { pair })
    }

    pub fn public_key(&self) -> Result<PublicKey, KeyError> {
        PublicKey::from_bytes(self.pair.public_key().as_ref())
    }

    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.pair.sign(message).as_ref().to_vec()
    }
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKey")
            .field("public_key", &self.public_key().ok())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// A credential line sent by a client: `auth ssh-ed25519 <blob> <signature>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedCredential {
    pub key: PublicKey,
    pub signature: Vec<u8>,
}

impl PresentedCredential {
    /// Returns `None` when `line` is not a credential line at all.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Result<Self, KeyError>> {
        let rest = line.trim().strip_prefix("auth ")?;
        Some(Self::parse_fields(rest))
    }

    fn parse_fields(rest: &str) -> Result<Self, KeyError> {
        let mut fields = rest.split_whitespace();
        let key_type = fields.next().ok_or(KeyError::Malformed("missing key type"))?;
        let blob = fields.next().ok_or(KeyError::Malformed("missing key blob"))?;
        let signature = fields.next().ok_or(KeyError::Malformed("missing signature"))?;
        let key = PublicKey::parse_openssh(&format!("{key_type} {blob}"))?;
        Ok(Self {
            key,
            signature: STANDARD.decode(signature)?,
        })
    }

    /// Whether the signature proves possession of `key` for this handshake.
    #[must_use]
    pub fn verify(&self, challenge: &Challenge, host_key: &PublicKey) -> bool {
        self.key
            .verify(&challenge.credential_message(host_key), &self.signature)
    }
}

/// Parsed authorized-keys file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedKeys {
    keys: Vec<PublicKey>,
}

impl AuthorizedKeys {
    /// Parse authorized-keys text. Blank lines and `#` comments are skipped;
    /// malformed lines are logged and skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let keys = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|(line_number, line)| match PublicKey::parse_openssh(line) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(
                        target: "showdown.auth",
                        line = line_number,
                        error = %e,
                        "Skipping malformed authorized key"
                    );
                    None
                }
            })
            .collect();
        Self { keys }
    }

    pub async fn load(path: &Path) -> Result<Self, KeyError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| KeyError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::parse(&text))
    }

    #[must_use]
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Facilitator key check against an authorized-keys file on disk.
///
/// The file is re-read on every check so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct FacilitatorKeys {
    path: PathBuf,
}

impl FacilitatorKeys {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Whether `key` may act as facilitator. Any failure to read the file
    /// is logged and answers `false`.
    pub async fn is_authorized(&self, key: &PublicKey) -> bool {
        match AuthorizedKeys::load(&self.path).await {
            Ok(keys) => keys.contains(key),
            Err(e) => {
                error!(
                    target: "showdown.auth",
                    path = %self.path.display(),
                    error = %e,
                    "Failed to load authorized keys, no facilitator credential accepted"
                );
                false
            }
        }
    }
}
