//! Capability tokens for transfer endpoints
//!
//! A capability token is an HS256 JWT authorizing one operation on one
//! repository for one user. Tokens are stateless: there is no revocation
//! list, so lifetimes should stay short.

use crate::{CryptoError, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The operation a token authorizes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Download,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            other => Err(CryptoError::InvalidToken(format!("unknown operation {other}"))),
        }
    }
}

/// Claims carried by a capability token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub repo_id: i64,
    pub op: String,
    pub user_id: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Not before (unix seconds)
    #[serde(default)]
    pub nbf: i64,
}

impl Claims {
    pub fn operation(&self) -> Result<Operation> {
        self.op.parse()
    }

    /// Whether these claims allow the requested access on `repo_id`.
    ///
    /// Writes need an upload token; reads accept either operation.
    pub fn permits(&self, repo_id: i64, write: bool) -> Result<()> {
        if self.repo_id != repo_id {
            return Err(CryptoError::InvalidToken("repository mismatch".to_string()));
        }
        let op = self.operation()?;
        if write && op != Operation::Upload {
            return Err(CryptoError::InvalidToken("operation mismatch".to_string()));
        }
        Ok(())
    }
}

/// Issues and validates capability tokens with a shared secret
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Mint a token valid for `ttl_secs` from now
    pub fn issue(&self, repo_id: i64, op: Operation, user_id: i64, ttl_secs: i64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            repo_id,
            op: op.as_str().to_string(),
            user_id,
            exp: now + ttl_secs,
            nbf: now,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CryptoError::Encoding(e.to_string()))
    }

    /// Check signature and expiry, returning the claims
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "capability token rejected");
                CryptoError::InvalidToken(e.to_string())
            })
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn test_issue_and_validate() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.issue(7, Operation::Upload, 42, 300).unwrap();
        let claims = codec.validate(&token).unwrap();

        assert_eq!(claims.repo_id, 7);
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.operation().unwrap(), Operation::Upload);
        assert!(claims.permits(7, true).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = TokenCodec::new(SECRET)
            .issue(1, Operation::Download, 1, 300)
            .unwrap();
        assert!(TokenCodec::new(b"other").validate(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = TokenCodec::new(SECRET);
        let now = Utc::now().timestamp();
        let claims = Claims {
            repo_id: 1,
            op: "download".to_string(),
            user_id: 1,
            exp: now - 3600,
            nbf: now - 7200,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap();

        assert!(matches!(codec.validate(&token), Err(CryptoError::InvalidToken(_))));
    }

    #[test]
    fn test_download_token_cannot_write() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.issue(3, Operation::Download, 9, 300).unwrap();
        let claims = codec.validate(&token).unwrap();

        assert!(claims.permits(3, false).is_ok());
        assert!(claims.permits(3, true).is_err());
        assert!(claims.permits(4, false).is_err());
    }

    #[test]
    fn test_unknown_operation_fails_closed() {
        let claims = Claims {
            repo_id: 1,
            op: "delete".to_string(),
            user_id: 1,
            exp: 0,
            nbf: 0,
        };
        assert!(claims.permits(1, false).is_err());
    }

    #[test]
    fn test_garbage_token() {
        assert!(TokenCodec::new(SECRET).validate("not.a.jwt").is_err());
    }
}
