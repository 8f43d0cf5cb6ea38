//! Deterministic key fixtures for testing
//!
//! Provides reproducible Ed25519 keys for host keys and facilitator
//! credentials. All fixtures are deterministic based on seed values.

use crate::client::Greeting;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::signature::{Ed25519KeyPair, KeyPair};
use showdown::auth::{Challenge, HostKey, PublicKey, CHALLENGE_LEN};

/// An Ed25519 key pair derived from a one-byte seed.
///
/// The same seed always produces the same key, so a test can use seed 1
/// for the host and seed 2 for the facilitator and get stable output.
pub struct TestKeyPair {
    seed: [u8; 32],
    pair: Ed25519KeyPair,
}

impl TestKeyPair {
    /// # Panics
    ///
    /// Never in practice: any 32-byte seed is a valid Ed25519 seed.
    pub fn from_seed(seed: u8) -> Self {
        let seed = seed_bytes(seed);
        let pair = Ed25519KeyPair::from_seed_unchecked(&seed).expect("valid Ed25519 seed");
        Self { seed, pair }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.pair.public_key().as_ref()).expect("32-byte public key")
    }

    /// `ssh-ed25519 <blob>` line for an authorized-keys file.
    pub fn authorized_key_line(&self) -> String {
        self.public_key().to_openssh()
    }

    /// PKCS#8 v1 document for this key.
    pub fn pkcs8(&self) -> Vec<u8> {
        build_pkcs8_from_seed(&self.seed)
    }

    /// Host key file contents: base64 of the PKCS#8 document.
    pub fn host_key_file_contents(&self) -> String {
        format!("{}\n", STANDARD.encode(self.pkcs8()))
    }

    pub fn host_key(&self) -> HostKey {
        HostKey::from_pkcs8(&self.pkcs8()).expect("fixture PKCS#8 is valid")
    }

    /// Credential line answering `greeting`'s challenge.
    pub fn auth_line(&self, greeting: &Greeting) -> String {
        let challenge = greeting.challenge();
        let host = greeting.host_key();
        let signature = self.pair.sign(&challenge.credential_message(&host));
        format!(
            "auth {} {}",
            self.authorized_key_line(),
            STANDARD.encode(signature.as_ref())
        )
    }

    /// Credential line with a signature over the wrong message.
    pub fn forged_auth_line(&self) -> String {
        let signature = self.pair.sign(b"not the challenge");
        format!(
            "auth {} {}",
            self.authorized_key_line(),
            STANDARD.encode(signature.as_ref())
        )
    }
}

/// Parse a hex challenge as sent in the greeting.
///
/// # Panics
///
/// Panics if `hex_challenge` is not exactly [`CHALLENGE_LEN`] hex-encoded bytes.
pub fn challenge_from_hex(hex_challenge: &str) -> Challenge {
    let bytes = hex::decode(hex_challenge).expect("challenge is hex");
    let bytes: [u8; CHALLENGE_LEN] = bytes.try_into().expect("challenge length");
    Challenge::from_bytes(bytes)
}

fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        let i = i as u8;
        *byte = seed.wrapping_mul(i.wrapping_add(1)).wrapping_add(i);
    }
    bytes
}

/// Build a PKCS#8 v1 document (RFC 5208) from an Ed25519 seed.
///
/// ring does not export PKCS#8 for a seeded key pair, so it is assembled
/// here. Production keys come from `Ed25519KeyPair::generate_pkcs8`.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // version INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING wrapping OCTET STRING(32)
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
