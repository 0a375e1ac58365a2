use std::sync::Arc;

use argon2::{
    Algorithm, Argon2, Params, PasswordHasher, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use healthbridge_db::Database;

use crate::auth::create_token;
use crate::router::router;
use crate::state::{AppState, AppStateInner, Settings};

pub const TEST_PASSWORD: &str = "secret1";

pub fn test_settings() -> Settings {
    Settings {
        jwt_secret: "test-secret".to_string(),
        token_ttl_hours: 1,
        retention_days: 30,
        expose_error_detail: false,
    }
}

/// A full router over an in-memory database. Must be built inside a runtime.
pub struct TestApp {
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Self {
            state: AppStateInner::build(db, settings),
        }
    }

    /// Insert a user with [`TEST_PASSWORD`] and return its id and a token.
    /// Cheap Argon2 parameters keep the tests fast.
    pub fn user(&self, name: &str, email: &str) -> (i64, String) {
        let params = Params::new(8, 1, 1, None).unwrap();
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(TEST_PASSWORD.as_bytes(), &salt)
            .unwrap()
            .to_string();
        let id = self.state.db.create_user(name, email, &hash, "doctor").unwrap();
        let token = create_token(&self.state.settings.jwt_secret, 1, id, email).unwrap();
        (id, token)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        self.send(request("GET", uri, token).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> Response<Body> {
        let req = request("POST", uri, token)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    async fn send(&self, req: Request<Body>) -> Response<Body> {
        router(self.state.clone()).oneshot(req).await.unwrap()
    }
}

fn request(method: &str, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match token {
        Some(t) => builder.header("Authorization", format!("Bearer {t}")),
        None => builder,
    }
}

pub async fn body_json(res: Response<Body>) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
