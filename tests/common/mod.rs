#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use myshop::api::{build_state, router, AppState};
use myshop::config::Config;
use myshop::services::MemoryBackend;
use myshop::store::{AccountStore, MemoryStore, Store};

pub const PASSWORD: &str = "s3cure-pass!";

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub mail: MemoryBackend,
}

pub struct Reply {
    pub status: StatusCode,
    pub content_type: String,
    pub text: String,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self { Self::with_config(Config::for_memory()) }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mail = MemoryBackend::new();
        let state = build_state(config, store.clone() as Arc<dyn Store>, Arc::new(mail.clone()), None);
        Self { app: router(state.clone()), state, store, mail }
    }

    pub async fn call(&self, method: Method, path: &str, body: Option<Value>, headers: &[(&str, &str)]) -> Reply {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder.header("content-type", "application/json").body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Reply { status, content_type, text, body }
    }

    pub async fn get(&self, path: &str, headers: &[(&str, &str)]) -> Reply {
        self.call(Method::GET, path, None, headers).await
    }

    pub async fn post(&self, path: &str, body: Value, headers: &[(&str, &str)]) -> Reply {
        self.call(Method::POST, path, Some(body), headers).await
    }

    pub async fn register(&self, email: &str) -> i64 {
        let reply = self.post("/api/accounts/register/", json!({"email": email, "password": PASSWORD, "first_name": "Sara"}), &[]).await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.body["user_id"].as_i64().unwrap()
    }

    pub async fn login(&self, email: &str) -> Reply {
        self.post("/api/accounts/token/", json!({"email": email, "password": PASSWORD}), &[("x-forwarded-for", "10.0.0.1")]).await
    }

    /// Registers and logs in, returning the bearer header value.
    pub async fn customer(&self, email: &str) -> String {
        self.register(email).await;
        let reply = self.login(email).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        format!("Bearer {}", reply.body["access"].as_str().unwrap())
    }

    pub async fn staff(&self, email: &str) -> String {
        let id = self.register(email).await;
        let mut customer = self.store.customer(id).await.unwrap().unwrap();
        customer.is_staff = true;
        self.store.update_customer(&customer).await.unwrap();
        let reply = self.login(email).await;
        format!("Bearer {}", reply.body["access"].as_str().unwrap())
    }

    /// Creates a product through the admin API.
    pub async fn product(&self, staff: &str, body: Value) -> i64 {
        let reply = self.post("/api/admin/products/", body, &[("authorization", staff)]).await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.body["id"].as_i64().unwrap()
    }
}
