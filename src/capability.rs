//! Signed, time-limited download links for raw messages.
//!
//! A link names one record (`address_id`, `message_id`) and is bound to the
//! owner it was issued to. The signature is HMAC-SHA256 over those fields
//! plus the expiry, so nothing in the URL can be changed without the key.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use url::Url;

use crate::error::{CapabilityError, ConfigError};

type HmacSha256 = Hmac<Sha256>;

/// Default validity of a download link (12 hours).
pub const DEFAULT_LINK_TTL_SECS: i64 = 43_200;

/// The fields a download link grants access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkClaims {
    pub owner_id: String,
    pub address_id: String,
    pub message_id: String,
    pub expires_at: i64,
}

/// Issues and checks download links.
#[derive(Clone)]
pub struct LinkSigner {
    secret: SecretString,
    base_url: Url,
    ttl: Duration,
}

impl LinkSigner {
    pub fn new(base_url: &str, secret: SecretString, ttl: Duration) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
            key: "RELAY_PUBLIC_BASE_URL".to_string(),
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_PUBLIC_BASE_URL".to_string(),
                message: "must be an http(s) base URL".to_string(),
            });
        }
        if secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_LINK_SECRET".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(Self {
            secret,
            base_url,
            ttl,
        })
    }

    /// Build a link valid for `ttl` from `now`.
    pub fn sign_url(
        &self,
        owner_id: &str,
        address_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, CapabilityError> {
        let claims = LinkClaims {
            owner_id: owner_id.to_string(),
            address_id: address_id.to_string(),
            message_id: message_id.to_string(),
            expires_at: (now + self.ttl).timestamp(),
        };
        let signature = self.signature(&claims)?;

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CapabilityError::Malformed("base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(["email", address_id, message_id]);
        url.query_pairs_mut()
            .append_pair("owner", owner_id)
            .append_pair("exp", &claims.expires_at.to_string())
            .append_pair("sig", &signature);
        Ok(url.to_string())
    }

    /// Check signature, then expiry.
    pub fn verify(
        &self,
        claims: &LinkClaims,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CapabilityError> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature.trim())
            .map_err(|_| CapabilityError::BadSignature)?;
        self.mac(claims)?
            .verify_slice(&provided)
            .map_err(|_| CapabilityError::BadSignature)?;

        if now.timestamp() >= claims.expires_at {
            return Err(CapabilityError::Expired);
        }
        Ok(())
    }

    fn mac(&self, claims: &LinkClaims) -> Result<HmacSha256, CapabilityError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| CapabilityError::Malformed(format!("invalid signing key: {e}")))?;
        // Newline-separated; none of the fields can contain a newline.
        mac.update(claims.owner_id.as_bytes());
        mac.update(b"\n");
        mac.update(claims.address_id.as_bytes());
        mac.update(b"\n");
        mac.update(claims.message_id.as_bytes());
        mac.update(b"\n");
        mac.update(claims.expires_at.to_string().as_bytes());
        Ok(mac)
    }

    fn signature(&self, claims: &LinkClaims) -> Result<String, CapabilityError> {
        Ok(URL_SAFE_NO_PAD.encode(self.mac(claims)?.finalize().into_bytes()))
    }
}

/// Recover the claims and signature from a link built by `sign_url`.
pub fn claims_from_url(link: &str) -> Result<(LinkClaims, String), CapabilityError> {
    let url = Url::parse(link).map_err(|e| CapabilityError::Malformed(e.to_string()))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();
    let (address_id, message_id) = match segments.as_slice() {
        [.., "email", address_id, message_id] => (address_id.to_string(), message_id.to_string()),
        _ => return Err(CapabilityError::Malformed("unexpected link path".to_string())),
    };

    let mut owner_id = None;
    let mut expires_at = None;
    let mut signature = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "owner" => owner_id = Some(value.into_owned()),
            "exp" => expires_at = Some(parse_expiry(&value)?),
            "sig" => signature = Some(value.into_owned()),
            _ => {}
        }
    }

    match (owner_id, expires_at, signature) {
        (Some(owner_id), Some(expires_at), Some(signature)) => Ok((
            LinkClaims {
                owner_id,
                address_id,
                message_id,
                expires_at,
            },
            signature,
        )),
        _ => Err(CapabilityError::Malformed(
            "missing owner, exp or sig".to_string(),
        )),
    }
}

/// Parse the `exp` query value.
pub fn parse_expiry(raw: &str) -> Result<i64, CapabilityError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| CapabilityError::Malformed(format!("bad expiry '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> LinkSigner {
        LinkSigner::new(
            "https://relay.example/",
            SecretString::from("test-secret"),
            Duration::seconds(DEFAULT_LINK_TTL_SECS),
        )
        .unwrap()
    }

    fn claims_from(url: &str) -> (LinkClaims, String) {
        claims_from_url(url).unwrap()
    }

    #[test]
    fn signed_url_has_expected_shape() {
        let now = Utc::now();
        let url = signer().sign_url("42", "abcd1234", "msg-1", now).unwrap();
        assert!(url.starts_with("https://relay.example/email/abcd1234/msg-1?owner=42&exp="));

        let (claims, _) = claims_from(&url);
        assert_eq!(claims.expires_at, (now + Duration::hours(12)).timestamp());
    }

    #[test]
    fn fresh_link_verifies() {
        let now = Utc::now();
        let s = signer();
        let (claims, sig) = claims_from(&s.sign_url("42", "abcd1234", "msg-1", now).unwrap());
        assert_eq!(s.verify(&claims, &sig, now), Ok(()));
    }

    #[test]
    fn expired_link_is_rejected() {
        let issued = Utc::now() - Duration::hours(13);
        let s = signer();
        let (claims, sig) = claims_from(&s.sign_url("42", "abcd1234", "msg-1", issued).unwrap());
        assert_eq!(
            s.verify(&claims, &sig, Utc::now()),
            Err(CapabilityError::Expired)
        );
    }

    #[test]
    fn tampered_fields_are_rejected() {
        let now = Utc::now();
        let s = signer();
        let (claims, sig) = claims_from(&s.sign_url("42", "abcd1234", "msg-1", now).unwrap());

        let mut other_message = claims.clone();
        other_message.message_id = "msg-2".into();
        assert_eq!(
            s.verify(&other_message, &sig, now),
            Err(CapabilityError::BadSignature)
        );

        let mut other_owner = claims.clone();
        other_owner.owner_id = "43".into();
        assert_eq!(
            s.verify(&other_owner, &sig, now),
            Err(CapabilityError::BadSignature)
        );

        let mut extended = claims;
        extended.expires_at += 3600;
        assert_eq!(
            s.verify(&extended, &sig, now),
            Err(CapabilityError::BadSignature)
        );
    }

    #[test]
    fn other_key_is_rejected() {
        let now = Utc::now();
        let (claims, sig) = claims_from(&signer().sign_url("42", "abcd1234", "m", now).unwrap());
        let other = LinkSigner::new(
            "https://relay.example",
            SecretString::from("other-secret"),
            Duration::hours(12),
        )
        .unwrap();
        assert_eq!(
            other.verify(&claims, &sig, now),
            Err(CapabilityError::BadSignature)
        );
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let claims = LinkClaims {
            owner_id: "42".into(),
            address_id: "abcd1234".into(),
            message_id: "m".into(),
            expires_at: i64::MAX,
        };
        assert_eq!(
            signer().verify(&claims, "not base64!!", Utc::now()),
            Err(CapabilityError::BadSignature)
        );
    }

    #[test]
    fn foreign_urls_do_not_parse() {
        assert!(matches!(
            claims_from_url("https://relay.example/other/path"),
            Err(CapabilityError::Malformed(_))
        ));
        assert!(matches!(
            claims_from_url("https://relay.example/email/a/m?owner=1"),
            Err(CapabilityError::Malformed(_))
        ));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(LinkSigner::new("not a url", SecretString::from("k"), Duration::hours(1)).is_err());
        assert!(
            LinkSigner::new("https://relay.example", SecretString::from(" "), Duration::hours(1))
                .is_err()
        );
    }
}
