//! Per-request authentication for the Widely API.
//!
//! Each call carries `{auth_id, hash, auth}` where `hash` is a fresh nonce
//! and `auth = md5(account_token + md5(brand_token + hash))`. Widely
//! recomputes the same chain on its side, so neither secret travels in
//! cleartext.

use md5::{Digest, Md5};
use serde::Serialize;

use crate::config::WidelyConfig;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Authentication triple for exactly one outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthTriple {
    pub auth_id: i64,
    pub hash: String,
    pub auth: String,
}

/// Builds [`AuthTriple`]s from the two long-lived secrets.
#[derive(Clone)]
pub struct AuthSigner {
    auth_id: i64,
    brand_token: String,
    account_token: String,
}

impl std::fmt::Debug for AuthSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSigner")
            .field("auth_id", &self.auth_id)
            .finish_non_exhaustive()
    }
}

impl AuthSigner {
    pub fn new(
        auth_id: i64,
        brand_token: impl Into<String>,
        account_token: impl Into<String>,
    ) -> Self {
        Self {
            auth_id,
            brand_token: brand_token.into(),
            account_token: account_token.into(),
        }
    }

    /// Build from validated config. `auth_id` presence is checked at startup.
    pub fn from_config(config: &WidelyConfig) -> Self {
        Self::new(
            config.auth_id.unwrap_or_default(),
            config.brand_token.clone(),
            config.account_token.clone(),
        )
    }

    /// Mint a triple for the next call. Never fails; wrong secrets only
    /// show up as an upstream rejection.
    pub fn create_auth(&self) -> AuthTriple {
        let hash = new_nonce(chrono::Utc::now().timestamp_millis(), rand::random::<u64>());
        self.sign_with_nonce(hash)
    }

    /// Deterministic half of [`create_auth`](Self::create_auth).
    pub fn sign_with_nonce(&self, hash: String) -> AuthTriple {
        let inner = md5_hex(&format!("{}{}", self.brand_token, hash));
        let auth = md5_hex(&format!("{}{}", self.account_token, inner));
        AuthTriple {
            auth_id: self.auth_id,
            hash,
            auth,
        }
    }
}

/// `"{millis}_{base36}"`. Uniqueness only, not secrecy.
fn new_nonce(timestamp_millis: i64, random: u64) -> String {
    format!("{timestamp_millis}_{}", to_base36(random))
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".into();
    }
    let mut digits = Vec::with_capacity(13);
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}
