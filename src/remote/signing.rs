// ABOUTME: HMAC-SHA256 request signing for the MarketSharp API
// ABOUTME: Produces the `company:key:timestamp:signature` Authorization value

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Credentials;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("MARKETSHARP_SECRET_KEY is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),
    #[error("secret key cannot be used as an HMAC key")]
    InvalidKey,
}

/// Signs requests with the account's shared secret.
///
/// The decoded secret is keyed into the MAC once; every request clones that
/// state and mixes in a fresh timestamp, since signatures expire.
#[derive(Clone)]
pub struct RequestSigner {
    company_id: String,
    api_key: String,
    mac: HmacSha256,
}

impl RequestSigner {
    pub fn new(credentials: &Credentials) -> Result<Self, SigningError> {
        let secret = STANDARD.decode(credentials.secret_key.trim())?;
        let mac = HmacSha256::new_from_slice(&secret).map_err(|_| SigningError::InvalidKey)?;
        Ok(Self {
            company_id: credentials.company_id.clone(),
            api_key: credentials.api_key.clone(),
            mac,
        })
    }

    /// Authorization header value for a request made at `timestamp` (Unix seconds).
    pub fn authorization(&self, timestamp: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{}{}{}", self.company_id, self.api_key, timestamp).as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        format!(
            "{}:{}:{}:{}",
            self.company_id, self.api_key, timestamp, signature
        )
    }

    /// Authorization header value for a request made now.
    pub fn authorization_now(&self) -> String {
        self.authorization(chrono::Utc::now().timestamp())
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("company_id", &self.company_id)
            .field("api_key", &"***")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(secret: &str) -> Credentials {
        Credentials {
            company_id: "1234".to_string(),
            api_key: "key-abc".to_string(),
            secret_key: secret.to_string(),
        }
    }

    #[test]
    fn test_authorization_layout() {
        let signer = RequestSigner::new(&credentials("c2VjcmV0")).unwrap();
        let header = signer.authorization(1_700_000_000);
        let parts: Vec<&str> = header.splitn(4, ':').collect();
        assert_eq!(parts[0], "1234");
        assert_eq!(parts[1], "key-abc");
        assert_eq!(parts[2], "1700000000");

        let raw = STANDARD.decode(parts[3]).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn test_signature_matches_hmac_of_message() {
        let signer = RequestSigner::new(&credentials("c2VjcmV0")).unwrap();
        let header = signer.authorization(42);

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"1234key-abc42");
        let expected = STANDARD.encode(mac.finalize().into_bytes());
        assert!(header.ends_with(&format!(":{}", expected)));
    }

    #[test]
    fn test_signature_changes_with_timestamp() {
        let signer = RequestSigner::new(&credentials("c2VjcmV0")).unwrap();
        assert_ne!(signer.authorization(1), signer.authorization(2));
    }

    #[test]
    fn test_invalid_base64_secret_is_rejected() {
        let err = RequestSigner::new(&credentials("not base64!!")).unwrap_err();
        assert!(matches!(err, SigningError::InvalidSecret(_)));
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = RequestSigner::new(&credentials("c2VjcmV0")).unwrap();
        assert!(!format!("{:?}", signer).contains("key-abc"));
    }
}
