//! Share tokens and storage keys.

use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};

/// Random bytes per share token (256 bits).
pub const SHARE_TOKEN_BYTES: usize = 32;

/// Length of an encoded share token.
pub const SHARE_TOKEN_LEN: usize = 43;

const MAX_EXTENSION_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
#[error("System random source unavailable")]
pub struct RandomError;

fn random_bytes<const N: usize>() -> Result<[u8; N], RandomError> {
    let mut buf = [0u8; N];
    SystemRandom::new().fill(&mut buf).map_err(|_| RandomError)?;
    Ok(buf)
}

/// A fresh URL-safe share token.
pub fn generate_share_token() -> Result<String, RandomError> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<SHARE_TOKEN_BYTES>()?))
}

/// Whether `token` has the shape of a token from [`generate_share_token`].
pub fn is_well_formed_share_token(token: &str) -> bool {
    token.len() == SHARE_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Lower-cased alphanumeric extension of `original_name`, with its dot, if any.
fn extension(original_name: &str) -> Option<String> {
    let ext = Path::new(original_name).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Storage key for an upload received at `now`: millisecond timestamp, a random
/// suffix, and the original extension, e.g. `20261017093000123-9f2c41ab.pdf`.
pub fn storage_key(original_name: &str, now: DateTime<Utc>) -> Result<String, RandomError> {
    let suffix = hex::encode(random_bytes::<4>()?);
    Ok(format!(
        "{}-{suffix}{}",
        now.format("%Y%m%d%H%M%S%3f"),
        extension(original_name).unwrap_or_default()
    ))
}
