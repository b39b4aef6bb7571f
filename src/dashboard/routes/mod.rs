pub mod containers;
pub mod images;
pub mod provision;
pub mod status;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::orchestrator::Controller;

#[derive(Clone)]
pub struct DashboardState {
    pub controller: Arc<Controller>,
}

/// Body of the image endpoints.
#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub image: String,
}

/// Error reply: a status code and a message for the user.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

pub fn api_router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/status", get(status::get_status))
        .route("/api/images", get(images::list_images))
        .route("/api/images/refresh", post(images::refresh))
        .route("/api/images/{role}/download", post(images::download))
        .route("/api/images/{role}/cancel", post(images::cancel))
        .route("/api/images/{role}/delete", post(images::delete))
        .route("/api/containers/{role}/toggle", post(containers::toggle))
        .route("/api/containers/{role}/run", post(containers::run))
        .route("/api/provision", post(provision::provision_now))
        .route("/api/provision/agent", post(provision::provision_agent))
        .route("/api/certs/clean", post(provision::clean_certs))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::PekitConfig;
    use crate::docker::testing::FakeEngine;
    use crate::platform::testing::FixedBootstrap;
    use crate::registry::testing::StaticRegistry;
    use serde_json::Value;
    use std::sync::atomic::Ordering;

    struct TestServer {
        base: String,
        engine: Arc<FakeEngine>,
        client: reqwest::Client,
    }

    async fn serve() -> TestServer {
        let mut config = PekitConfig::default();
        config.registry.username = Some("bob".to_string());
        config.registry.password = Some("secret".to_string());
        config.timing.sign_delay_secs = 0;

        let engine = Arc::new(FakeEngine::new());
        engine.add_image(&["geoffwilliams/pe_agent_demo:2016.2.1"]);
        engine.add_image(&["geoffwilliams/pe_master_public_lowmem:2016.2.1"]);
        engine
            .images_in_use
            .lock()
            .insert("geoffwilliams/pe_master_public_lowmem:2016.2.1".to_string());
        let registry = Arc::new(StaticRegistry::with(
            "geoffwilliams/pe_agent_demo",
            &["2016.4.0"],
        ));
        let controller = Controller::new(
            config,
            engine.clone(),
            Arc::new(FixedBootstrap::new("127.0.0.1")),
            registry,
        )
        .unwrap();
        controller.attach().await.unwrap();

        let app = api_router(DashboardState { controller });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TestServer {
            base: format!("http://{}", addr),
            engine,
            client: reqwest::Client::new(),
        }
    }

    impl TestServer {
        async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut req = self.client.post(format!("{}{}", self.base, path));
            if let Some(body) = body {
                req = req.json(&body);
            }
            let resp = req.send().await.unwrap();
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
            (status, resp.json().await.unwrap_or(Value::Null))
        }

        async fn get(&self, path: &str) -> Value {
            self.client
                .get(format!("{}{}", self.base, path))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn status_lists_both_containers() {
        let server = serve().await;
        let status = server.get("/api/status").await;
        assert_eq!(status["setup_complete"], true);
        assert_eq!(status["containers"].as_array().unwrap().len(), 2);
        assert_eq!(status["containers"][0]["role"], "master");
        assert_eq!(status["provisioning"]["phase"], "idle");
    }

    #[tokio::test]
    async fn catalog_change_is_reported_once() {
        let server = serve().await;
        assert_eq!(server.get("/api/status").await["catalog_changed"], true);
        assert_eq!(server.get("/api/status").await["catalog_changed"], false);

        let (status, _) = server.post("/api/images/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(server.get("/api/status").await["catalog_changed"], true);
    }

    #[tokio::test]
    async fn images_show_local_and_downloadable() {
        let server = serve().await;
        let images = server.get("/api/images").await;
        let agent = &images[1];
        assert_eq!(agent["role"], "agent");
        assert_eq!(agent["local"][0], "geoffwilliams/pe_agent_demo:2016.2.1");
        assert_eq!(agent["downloadable"][0], "geoffwilliams/pe_agent_demo:2016.4.0");
    }

    #[tokio::test]
    async fn toggle_starts_container() {
        let server = serve().await;
        let (status, body) = server.post("/api/containers/agent/toggle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "started");
        assert_eq!(server.engine.containers.lock().len(), 1);
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let server = serve().await;
        let (status, _) = server.post("/api/containers/db/toggle", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deleting_image_in_use_is_a_conflict() {
        let server = serve().await;
        let (status, body) = server
            .post(
                "/api/images/master/delete",
                Some(serde_json::json!({ "image": "geoffwilliams/pe_master_public_lowmem:2016.2.1" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("in use"));
    }

    #[tokio::test]
    async fn download_of_other_role_image_is_rejected() {
        let server = serve().await;
        let (status, body) = server
            .post(
                "/api/images/agent/download",
                Some(serde_json::json!({ "image": "geoffwilliams/pe_master_public_lowmem:2016.4.0" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not in the agent image repository"));
        assert_eq!(server.engine.pull_calls.load(Ordering::SeqCst), 0);

        let (status, body) = server
            .post(
                "/api/images/agent/download",
                Some(serde_json::json!({ "image": "geoffwilliams/pe_agent_demo:2016.4.0" })),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "started");
    }

    #[tokio::test]
    async fn cancel_without_download_reports_false() {
        let server = serve().await;
        let (status, body) = server
            .post(
                "/api/images/agent/cancel",
                Some(serde_json::json!({ "image": "geoffwilliams/pe_agent_demo:2016.4.0" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], false);
    }

    #[tokio::test]
    async fn management_run_on_stopped_container_fails() {
        let server = serve().await;
        let (status, body) = server.post("/api/containers/agent/run", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }
}
