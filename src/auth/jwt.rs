use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::HubError;

/// Verifies bearer tokens issued by the auth service.
///
/// Verification is pure: the shared HMAC secret (and optional
/// issuer/audience) come from configuration, nothing else is consulted.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<super::Claims, HubError> {
        let token_data = decode::<super::Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| HubError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}
