//! Remote registry tag listing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::model::{Credentials, RegistryConfig};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("registry rejected the credentials")]
    Auth,

    #[error("unexpected registry response: {0}")]
    Decode(String),
}

/// Remote side of the image catalog.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// All tags published for `repository` (e.g. `geoffwilliams/pe_agent_demo`).
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError>;

    /// Check that the configured credentials are accepted.
    async fn verify_login(&self) -> Result<(), RegistryError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Docker Registry HTTP API v2 client using bearer tokens.
pub struct HttpRegistry {
    client: reqwest::Client,
    config: RegistryConfig,
    credentials: Option<Credentials>,
}

impl HttpRegistry {
    pub fn new(config: &RegistryConfig, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            credentials: config.credentials(),
            config: config.clone(),
        })
    }

    async fn token(&self, scope: Option<&str>) -> Result<String, RegistryError> {
        let mut query = vec![("service", self.config.auth_service.clone())];
        if let Some(scope) = scope {
            query.push(("scope", scope.to_string()));
        }
        let mut request = self.client.get(&self.config.auth_url).query(&query);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(RegistryError::Auth);
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                url: self.config.auth_url.clone(),
            });
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        Ok(body.token)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        let scope = format!("repository:{}:pull", repository);
        let token = self.token(Some(&scope)).await?;

        let url = format!(
            "{}/v2/{}/tags/list",
            self.config.address.trim_end_matches('/'),
            repository
        );
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RegistryError::Auth);
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let body: TagList = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        let tags = body.tags.unwrap_or_default();
        tracing::debug!(repository = %repository, count = tags.len(), "listed registry tags");
        Ok(tags)
    }

    async fn verify_login(&self) -> Result<(), RegistryError> {
        if self.credentials.is_none() {
            return Err(RegistryError::Auth);
        }
        self.token(None).await.map(|_| ())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config_for(base: &str, with_credentials: bool) -> RegistryConfig {
        RegistryConfig {
            username: with_credentials.then(|| "bob".to_string()),
            password: with_credentials.then(|| "secret".to_string()),
            address: base.to_string(),
            auth_url: format!("{}/token", base),
            auth_service: "registry.test".to_string(),
        }
    }

    fn app() -> Router {
        Router::new()
            .route(
                "/token",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        if !headers.contains_key("authorization") {
                            return Err(StatusCode::UNAUTHORIZED);
                        }
                        assert_eq!(q.get("service").map(String::as_str), Some("registry.test"));
                        Ok(Json(serde_json::json!({ "token": "t0k3n" })))
                    },
                ),
            )
            .route(
                "/v2/acme/agent/tags/list",
                get(|headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if auth != "Bearer t0k3n" {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    Ok(Json(serde_json::json!({
                        "name": "acme/agent",
                        "tags": ["2016.2.1", "2016.4.0"]
                    })))
                }),
            )
    }

    #[tokio::test]
    async fn lists_tags_with_bearer_token() {
        let base = serve(app()).await;
        let registry = HttpRegistry::new(&config_for(&base, true), Duration::from_secs(5)).unwrap();
        let tags = registry.list_tags("acme/agent").await.unwrap();
        assert_eq!(tags, vec!["2016.2.1", "2016.4.0"]);
        registry.verify_login().await.unwrap();
    }

    #[tokio::test]
    async fn missing_credentials_fail_login() {
        let base = serve(app()).await;
        let registry =
            HttpRegistry::new(&config_for(&base, false), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            registry.verify_login().await,
            Err(RegistryError::Auth)
        ));
        assert!(matches!(
            registry.list_tags("acme/agent").await,
            Err(RegistryError::Auth)
        ));
    }

    #[tokio::test]
    async fn unknown_repository_reports_status() {
        let base = serve(app()).await;
        let registry = HttpRegistry::new(&config_for(&base, true), Duration::from_secs(5)).unwrap();
        match registry.list_tags("acme/nothing").await {
            Err(RegistryError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn unreachable_registry_is_an_http_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let registry = HttpRegistry::new(&config_for(&base, true), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            registry.list_tags("acme/agent").await,
            Err(RegistryError::Http(_))
        ));
    }
}
