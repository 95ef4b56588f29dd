use async_trait::async_trait;
use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{CollabError, Identity, TokenKind};
use crate::services::ports::CredentialVerifier;

/// Claims carried by user and service tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: Option<TokenKind>,
    #[serde(default, alias = "org", skip_serializing_if = "Option::is_none")]
    pub firm: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub exp: usize,
}

// Get the auth token from request headers
pub fn get_auth_token(headers: &HeaderMap) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string())
    }
    // 2. Try to get token from cookies
    else {
        let cookie_header = headers
            .get(http::header::COOKIE)
            .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;

        for cookie in cookie::Cookie::split_parse(cookie_header).flatten() {
            if cookie.name() == "auth_token" {
                return Ok(cookie.value().to_string());
            }
        }
        Err("auth_token cookie not found".to_string())
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &validation)
}

/// Verifies HS256 tokens signed with the shared cloud secret.
pub struct JwtVerifier {
    secret: String,
}

impl JwtVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify_credential(&self, token: &str) -> Result<Identity, CollabError> {
        if token.is_empty() {
            return Err(CollabError::Authentication("missing credential".to_string()));
        }

        let claims = validate_jwt(token, &self.secret)
            .map_err(|e| CollabError::Authentication(format!("JWT validation failed: {}", e)))?
            .claims;

        match claims.token_type {
            Some(TokenKind::User) => {
                let firm_id = claims
                    .firm
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| CollabError::Authentication("JWT token does not contain 'firm' claim".to_string()))?;
                info!("User token validated successfully for {}", claims.sub);
                Ok(Identity {
                    kind: TokenKind::User,
                    subject: claims.sub,
                    firm_id,
                    roles: claims.roles,
                })
            }
            Some(TokenKind::Service) => {
                info!("Service token validated successfully for {}", claims.sub);
                let mut identity = Identity::service(claims.sub);
                identity.roles = claims.roles;
                Ok(identity)
            }
            None => Err(CollabError::Authentication("JWT token does not contain 'type' claim".to_string())),
        }
    }
}
