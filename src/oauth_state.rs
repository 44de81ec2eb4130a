//! # OAuth State Signing
//!
//! The `state` parameter round-tripped through the Salesforce authorization
//! redirect has the form `nonce:org_id:signature`. The signature is the first
//! 16 hex characters of HMAC-SHA256(app secret, `nonce:org_id`). Nothing is
//! persisted; the signature alone binds the callback to the organization that
//! started the flow.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 32;
const SIGNATURE_HEX_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum StateSignerError {
    #[error("state signing secret must not be empty")]
    EmptySecret,
    #[error("state signing secret rejected: {0}")]
    InvalidSecret(String),
}

/// Generates and verifies signed OAuth state tokens.
#[derive(Clone)]
pub struct StateSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for StateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSigner").finish_non_exhaustive()
    }
}

impl StateSigner {
    pub fn new(secret: &str) -> Result<Self, StateSignerError> {
        if secret.is_empty() {
            return Err(StateSignerError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| StateSignerError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Issue a fresh state for `org_id`.
    pub fn generate(&self, org_id: Uuid) -> String {
        let nonce = generate_nonce();
        let payload = format!("{nonce}:{org_id}");
        let signature = self.sign(&payload);
        format!("{payload}:{signature}")
    }

    /// Return the embedded org id when the state is well formed and the
    /// signature matches. The org id is returned as text; callers parse it.
    pub fn verify(&self, state: &str) -> Option<String> {
        let mut parts = state.split(':');
        let (nonce, org_id, signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || nonce.is_empty() || org_id.is_empty() || signature.is_empty()
        {
            return None;
        }

        let expected = self.sign(&format!("{nonce}:{org_id}"));
        if expected.as_bytes().ct_eq(signature.as_bytes()).into() {
            Some(org_id.to_string())
        } else {
            None
        }
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());
        digest[..SIGNATURE_HEX_LEN].to_string()
    }
}

/// 256 random bits, base64url without padding (never contains `:`).
fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}
