use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{CollabError, UserProfile};
use crate::services::ports::UserDirectory;

/// Client for the app service, which owns user profiles
#[derive(Debug)]
pub struct AppServiceClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<UserProfile>,
}

impl AppServiceClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            jwt_secret,
            service_name,
        })
    }

    fn generate_token(&self) -> Result<String, jsonwebtoken::errors::Error> {
        let expiration = (Utc::now() + Duration::seconds(60)).timestamp(); // 1 minute expiration

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
    }

    /// Fetch display data for a batch of user ids
    pub async fn get_users(&self, ids: &[String]) -> Result<Vec<UserProfile>, CollabError> {
        let token = self
            .generate_token()
            .map_err(|e| CollabError::Persistence(format!("Failed to generate service token: {}", e)))?;
        let url = format!("{}/auth/users", self.base_url);
        let response: UsersResponse = self
            .client
            .get(&url)
            .query(&[("ids", ids.join(","))])
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CollabError::Persistence(format!("App service request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| CollabError::Persistence(format!("Invalid app service response: {}", e)))?;

        info!("Resolved {} of {} users from app service", response.users.len(), ids.len());
        Ok(response.users)
    }
}

#[async_trait]
impl UserDirectory for AppServiceClient {
    async fn resolve_users(&self, ids: &[String]) -> Result<Vec<UserProfile>, CollabError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.get_users(ids).await
    }
}
