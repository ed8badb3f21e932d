//! Bearer token claims.
//!
//! The backend issues JWTs. The client never verifies signatures; it only
//! reads the payload to learn who the token belongs to and when it expires.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Buffer time before expiry at which a token counts as expired (5 minutes)
pub const EXPIRY_MARGIN_SECS: i64 = 300;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("Invalid token format: expected three dot-separated segments")]
    Format,

    #[error("Invalid token payload encoding: {0}")]
    Encoding(String),

    #[error("Invalid token payload: {0}")]
    Payload(String),

    #[error("Token expiry out of range: {0}")]
    ExpiryOutOfRange(i64),
}

/// User id claim. Some issuers emit numbers, others strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubjectId {
    Number(i64),
    Text(String),
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Number(n) => write!(f, "{}", n),
            SubjectId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub user_id: Option<SubjectId>,
    #[serde(default)]
    pub sub: Option<SubjectId>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
    /// Expiry as seconds since the Unix epoch
    pub exp: i64,
}

impl TokenClaims {
    /// Decode the payload segment of a JWT without verifying its signature.
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(ClaimsError::Format),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ClaimsError::Encoding(e.to_string()))?;

        let claims: Self =
            serde_json::from_slice(&bytes).map_err(|e| ClaimsError::Payload(e.to_string()))?;
        if claims.expires_at().is_none() {
            return Err(ClaimsError::ExpiryOutOfRange(claims.exp));
        }
        Ok(claims)
    }

    /// The token's subject, preferring `user_id` over `sub`.
    pub fn subject(&self) -> Option<&SubjectId> {
        self.user_id.as_ref().or(self.sub.as_ref())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    pub fn has_admin_access(&self) -> bool {
        self.is_admin || self.is_superuser || self.role.as_deref() == Some("admin")
    }
}

/// How a credential came to be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    Issued,
    Refreshed,
    Restored,
}

#[derive(Debug, Clone)]
pub struct Credential {
    token: String,
    claims: TokenClaims,
    origin: CredentialOrigin,
}

impl Credential {
    pub fn parse(token: impl Into<String>, origin: CredentialOrigin) -> Result<Self, ClaimsError> {
        let token = token.into();
        let claims = TokenClaims::decode(&token)?;
        Ok(Self {
            token,
            claims,
            origin,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }

    /// True once `now` is within the safety margin of the `exp` claim.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.claims.exp.saturating_sub(EXPIRY_MARGIN_SECS)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before the hard `exp` claim (negative once passed).
    pub fn time_until_expiry(&self) -> Duration {
        let secs = self.claims.exp.saturating_sub(Utc::now().timestamp());
        Duration::try_seconds(secs).unwrap_or(if secs < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token_with(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn test_decode_simplejwt_payload() {
        let token = token_with(json!({
            "token_type": "access",
            "exp": 1_900_000_000,
            "user_id": 42,
            "role": "teacher",
            "is_staff": true
        }));
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.subject(), Some(&SubjectId::Number(42)));
        assert_eq!(claims.role.as_deref(), Some("teacher"));
        assert!(claims.is_staff);
        assert!(!claims.has_admin_access());
        assert_eq!(claims.expires_at().unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_subject_falls_back_to_sub() {
        let token = token_with(json!({"exp": 1, "sub": "abc-123", "is_admin": true}));
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.subject().map(|s| s.to_string()).as_deref(), Some("abc-123"));
        assert!(claims.has_admin_access());
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert_eq!(TokenClaims::decode("not-a-jwt"), Err(ClaimsError::Format));
        assert_eq!(TokenClaims::decode("a.b.c.d"), Err(ClaimsError::Format));
        assert!(matches!(
            TokenClaims::decode("a.!!!.c"),
            Err(ClaimsError::Encoding(_))
        ));
        let missing_exp = token_with(json!({"user_id": 1}));
        assert!(matches!(
            TokenClaims::decode(&missing_exp),
            Err(ClaimsError::Payload(_))
        ));
    }

    #[test]
    fn test_expiry_margin_boundary() {
        let exp = 2_000_000_000;
        let credential =
            Credential::parse(token_with(json!({"exp": exp})), CredentialOrigin::Issued).unwrap();
        let at = |secs: i64| Utc.timestamp_opt(secs, 0).unwrap();

        assert!(!credential.is_expired_at(at(exp - EXPIRY_MARGIN_SECS - 1)));
        assert!(credential.is_expired_at(at(exp - EXPIRY_MARGIN_SECS)));
        assert!(credential.is_expired_at(at(exp - 120)));
        assert!(credential.is_expired_at(at(exp + 10)));
    }

    #[test]
    fn test_decode_rejects_unrepresentable_expiry() {
        for exp in [i64::MIN + 1, 100_000_000_000_000_000] {
            let token = token_with(json!({ "exp": exp }));
            assert_eq!(
                TokenClaims::decode(&token),
                Err(ClaimsError::ExpiryOutOfRange(exp))
            );
        }
    }

    #[test]
    fn test_extreme_expiry_does_not_overflow() {
        let credential = |exp: i64| Credential {
            token: String::new(),
            claims: TokenClaims::decode(&token_with(json!({"exp": 0})))
                .map(|claims| TokenClaims { exp, ..claims })
                .unwrap(),
            origin: CredentialOrigin::Restored,
        };

        let ancient = credential(i64::MIN + 1);
        assert!(ancient.is_expired());
        assert!(ancient.time_until_expiry() < Duration::zero());

        let distant = credential(i64::MAX);
        assert!(!distant.is_expired());
        assert_eq!(distant.time_until_expiry(), TimeDelta::MAX);
    }

    #[test]
    fn test_fresh_token_is_not_expired() {
        let exp = Utc::now().timestamp() + 3600;
        let credential =
            Credential::parse(token_with(json!({"exp": exp})), CredentialOrigin::Issued).unwrap();
        assert!(!credential.is_expired());
        assert!(credential.time_until_expiry() > Duration::minutes(59));
    }
}
