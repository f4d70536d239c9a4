use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

/// The verified identity triple carried by every credential. Both the REST
/// middleware and the websocket handshake resolve a bearer token into this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: String,
    pub organization_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub role: String,
    pub organization_id: String,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn from_env() -> AppResult<Self> {
        let secret = std::env::var("SECRET_KEY")
            .map_err(|_| AppError::Internal("SECRET_KEY not set".to_string()))?;
        Ok(Self::new(&secret))
    }

    pub fn generate_token(&self, identity: &Identity, ttl: chrono::Duration) -> AppResult<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: identity.user_id.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            role: identity.role.clone(),
            organization_id: identity.organization_id.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to generate token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> AppResult<Identity> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| Identity {
                user_id: data.claims.sub,
                role: data.claims.role,
                organization_id: data.claims.organization_id,
            })
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
    }
}
