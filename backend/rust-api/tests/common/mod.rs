#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use oab_quiz_api::{
    config::{Config, SyncMode},
    create_router,
    middlewares::auth::JwtClaims,
    models::{Choice, Question},
    services::{session_cache::MemorySessionCache, AppState},
    store::{MemoryStore, QUESTIONS},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "integration-test-secret";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
}

/// Question `q{n}`; the correct answer cycles through A..D.
pub fn question(n: i32, area: &str) -> Question {
    let correct = [Choice::A, Choice::B, Choice::C, Choice::D][(n as usize) % 4];
    Question {
        id: format!("q{}", n),
        year: 2020 + n % 4,
        exam: format!("Exame {}", 30 + n % 4),
        number: n,
        area: area.to_string(),
        theme: Some("Tema geral".to_string()),
        subject: None,
        statement: format!("Enunciado da questão {} de {}", n, area),
        alternative_a: "Alternativa A".to_string(),
        alternative_b: "Alternativa B".to_string(),
        alternative_c: "Alternativa C".to_string(),
        alternative_d: "Alternativa D".to_string(),
        alternative_e: None,
        correct_answer: correct,
        explanation: Some(format!("Comentário da questão {}", n)),
    }
}

/// Six constitutional law questions (q1..q6) and four civil law ones (q7..q10).
pub fn question_bank() -> Vec<Question> {
    (1..=10)
        .map(|n| {
            let area = if n <= 6 {
                "Direito Constitucional"
            } else {
                "Direito Civil"
            };
            question(n, area)
        })
        .collect()
}

pub fn wrong_choice(correct: Choice) -> Choice {
    if correct == Choice::A {
        Choice::B
    } else {
        Choice::A
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(Config::in_memory(JWT_SECRET)).await
}

pub async fn create_blocking_test_app() -> TestApp {
    let mut config = Config::in_memory(JWT_SECRET);
    config.sync.mode = SyncMode::Blocking;
    create_test_app_with(config).await
}

pub async fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(MemoryStore::new());
    store
        .seed(QUESTIONS, &question_bank())
        .await
        .expect("Failed to seed question bank");

    let state = Arc::new(AppState::with_backends(
        config,
        store.clone(),
        Arc::new(MemorySessionCache::new()),
    ));

    TestApp {
        router: create_router(state),
        store,
    }
}

pub fn token_for(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        aud: "authenticated".to_string(),
        role: Some("authenticated".to_string()),
        email: Some(format!("{}@example.com", user_id)),
        exp: (now + 3600) as usize,
        iat: Some(now as usize),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token")
}

/// Sends an authenticated request and returns status plus JSON body
/// (`Value::Null` for empty bodies).
pub async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    user_id: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token_for(user_id)));
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            panic!(
                "non-JSON body for {} {}: {}",
                method,
                uri,
                String::from_utf8_lossy(&bytes)
            )
        })
    };
    (status, json)
}

pub fn correct_answer_of(question_id: &str) -> Choice {
    question_bank()
        .into_iter()
        .find(|q| q.id == question_id)
        .map(|q| q.correct_answer)
        .expect("unknown question id")
}
