use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use lead_capture::client_ip::ClientIpPolicy;
use lead_capture::crm::CrmResult;
use lead_capture::pipeline::LeadPipeline;
use lead_capture::router::{router, AppState};
use lead_capture::test_utils::{MockBotVerifier, MockCrmClient, MockLeadStore};
use limiters::{build_rate_limiter, InMemoryConfig};
use serde_json::Value;

pub struct TestApp {
    pub app: Router,
    pub crm: MockCrmClient,
    pub store: MockLeadStore,
    pub bot: MockBotVerifier,
}

pub fn test_app(crm_result: CrmResult, bot: MockBotVerifier) -> TestApp {
    let crm = MockCrmClient::new(crm_result);
    let store = MockLeadStore::new();

    let pipeline = LeadPipeline::new(
        Arc::new(crm.clone()),
        None,
        Some(Arc::new(store.clone())),
        "https://www.example.org",
    );
    let state = AppState {
        pipeline: Arc::new(pipeline),
        rate_limiter: build_rate_limiter(None, InMemoryConfig::default()),
        bot_verifier: Arc::new(bot.clone()),
        client_ip_policy: Arc::new(ClientIpPolicy::new("x-real-ip", false)),
    };

    TestApp {
        app: router(state, None),
        crm,
        store,
        bot,
    }
}

pub fn post_json(path: &str, ip: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-real-ip", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
