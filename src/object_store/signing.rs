use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

use super::ResponseOverrides;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Link has expired")]
    Expired,
    #[error("Link signature is invalid")]
    Invalid,
}

/// Issues and verifies expiring HMAC-SHA256 links for blobs served by this process.
#[derive(Clone)]
pub struct LinkSigner {
    key: hmac::Key,
    base_url: String,
}

impl LinkSigner {
    pub fn new(secret: &[u8], base_url: impl Into<String>) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Signer with a random per-process key.
    pub fn random(base_url: impl Into<String>) -> Result<Self, anyhow::Error> {
        let mut secret = [0u8; 32];
        SystemRandom::new()
            .fill(&mut secret)
            .map_err(|_| anyhow::anyhow!("Failed to generate link signing key"))?;
        Ok(Self::new(&secret, base_url))
    }

    fn message(key: &str, expires: i64, overrides: Option<&ResponseOverrides>) -> String {
        match overrides {
            Some(o) => format!(
                "{key}\n{expires}\n{}\n{}",
                o.content_type, o.content_disposition
            ),
            None => format!("{key}\n{expires}"),
        }
    }

    /// Build `{base}/blobs/{key}?expires=..&signature=..`, valid for `ttl_secs`.
    /// Overrides travel as `response-content-type` and
    /// `response-content-disposition` and are covered by the signature.
    pub fn sign(
        &self,
        key: &str,
        ttl_secs: u64,
        overrides: Option<&ResponseOverrides>,
    ) -> String {
        let expires = i64::try_from(ttl_secs)
            .ok()
            .and_then(|ttl| Utc::now().timestamp().checked_add(ttl))
            .unwrap_or(i64::MAX);
        let tag = hmac::sign(&self.key, Self::message(key, expires, overrides).as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(tag.as_ref());

        let mut url = format!(
            "{}/blobs/{key}?expires={expires}&signature={signature}",
            self.base_url
        );
        if let Some(o) = overrides {
            url.push_str(&format!(
                "&response-content-type={}&response-content-disposition={}",
                utf8_percent_encode(&o.content_type, NON_ALPHANUMERIC),
                utf8_percent_encode(&o.content_disposition, NON_ALPHANUMERIC),
            ));
        }
        url
    }

    /// Check a link's signature (in constant time) and its expiry.
    pub fn verify(
        &self,
        key: &str,
        expires: i64,
        overrides: Option<&ResponseOverrides>,
        signature: &str,
    ) -> Result<(), SignatureError> {
        let tag = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Invalid)?;
        hmac::verify(
            &self.key,
            Self::message(key, expires, overrides).as_bytes(),
            &tag,
        )
        .map_err(|_| SignatureError::Invalid)?;

        if Utc::now().timestamp() >= expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }
}
