//! Authentication Module
//!
//! Static bearer tokens. Clients send `Authorization: Bearer <token>`; the
//! token must equal one of the configured tokens. With no tokens configured
//! every request is allowed.
//!
//! Only SHA-256 digests of the tokens are kept, and incoming tokens are
//! compared digest against digest without short-circuiting, so the time
//! taken does not depend on how much of a token matched.

use crate::config::{process_env, EnvLookup};
use crate::error::{ApiError, ApiResult};
use sha2::{Digest, Sha256};
use std::fmt;

type TokenDigest = [u8; 32];

#[derive(Clone, Default)]
pub struct AuthConfig {
    tokens: Vec<TokenDigest>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("tokens", &format!("[{} tokens]", self.tokens.len()))
            .finish()
    }
}

impl AuthConfig {
    /// Load tokens from `RUUVI_API_TOKENS` (comma-separated).
    pub fn from_env() -> Self {
        Self::default().with_env(&process_env)
    }

    /// Replace the tokens with `RUUVI_API_TOKENS` when it is set.
    pub fn with_env(self, env: EnvLookup<'_>) -> Self {
        match env("RUUVI_API_TOKENS") {
            Some(tokens) => Self::with_tokens(tokens.split(',')),
            None => self,
        }
    }

    /// Build from raw tokens; blank entries are ignored.
    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for token in tokens {
            config.add_token(token.as_ref());
        }
        config
    }

    pub fn add_token(&mut self, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            return;
        }
        let digest = digest(token);
        if !self.tokens.contains(&digest) {
            self.tokens.push(digest);
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_valid_token(&self, token: &str) -> bool {
        let candidate = digest(token);
        self.tokens
            .iter()
            .fold(false, |found, known| found | constant_time_eq(known, &candidate))
    }

    /// Check the raw `Authorization` header value.
    pub fn authenticate(&self, header: Option<&str>) -> ApiResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let token = extract_bearer_token(header.unwrap_or_default());
        if self.is_valid_token(token) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Invalid or missing bearer token"))
        }
    }
}

/// Strip the `Bearer ` scheme. A header without it is taken as the token.
pub fn extract_bearer_token(header: &str) -> &str {
    header.strip_prefix("Bearer ").unwrap_or(header).trim()
}

fn digest(token: &str) -> TokenDigest {
    Sha256::digest(token.as_bytes()).into()
}

fn constant_time_eq(a: &TokenDigest, b: &TokenDigest) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_disabled_allows_everything() {
        let config = AuthConfig::default();
        assert!(!config.is_enabled());
        assert!(config.authenticate(None).is_ok());
        assert!(config.authenticate(Some("Bearer whatever")).is_ok());
    }

    #[test]
    fn test_valid_token() {
        let config = AuthConfig::with_tokens(["alpha", " beta ", ""]);
        assert_eq!(config.token_count(), 2);
        assert!(config.authenticate(Some("Bearer alpha")).is_ok());
        assert!(config.authenticate(Some("Bearer beta")).is_ok());
    }

    #[test]
    fn test_invalid_or_missing_token_is_forbidden() {
        let config = AuthConfig::with_tokens(["alpha"]);
        let err = config.authenticate(Some("Bearer alph")).unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert!(config.authenticate(None).is_err());
        assert!(config.authenticate(Some("")).is_err());
    }

    #[test]
    fn test_header_without_scheme() {
        assert_eq!(extract_bearer_token("Bearer abc"), "abc");
        assert_eq!(extract_bearer_token("abc"), "abc");
    }

    #[test]
    fn test_debug_hides_tokens() {
        let config = AuthConfig::with_tokens(["secret-token"]);
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("1 tokens"));
    }
}
