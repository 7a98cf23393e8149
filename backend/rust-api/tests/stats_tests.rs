use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;

use common::{call, correct_answer_of, wrong_choice};

/// Answers every question of a fresh session, missing the ones in `miss`.
async fn play_session(app: &common::TestApp, user: &str, body: Value, miss: &[&str]) -> Value {
    let (status, session) = call(app, "POST", "/api/v1/sessions", user, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", session);
    let uri = format!("/api/v1/sessions/{}", session["session_id"].as_str().unwrap());
    let total = session["total_questions"].as_u64().unwrap();

    for i in 0..total {
        let (_, view) = call(app, "GET", &uri, user, None).await;
        let qid = view["current_question_id"].as_str().unwrap().to_string();
        let key = correct_answer_of(&qid);
        let choice = if miss.contains(&qid.as_str()) { wrong_choice(key) } else { key };
        let (status, _) = call(
            app,
            "POST",
            &format!("{}/answers", uri),
            user,
            Some(json!({ "question_id": qid, "answer": choice.as_str() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        if i + 1 < total {
            call(app, "POST", &format!("{}/next", uri), user, None).await;
        }
    }

    let (status, done) = call(app, "POST", &format!("{}/complete", uri), user, None).await;
    assert_eq!(status, StatusCode::OK);
    done
}

#[tokio::test]
async fn test_overview_reports_weakest_area_first() {
    let app = common::create_blocking_test_app().await;

    let done = play_session(
        &app,
        "aluno-1",
        json!({ "mode": "area", "filter": { "area": "Direito Civil" } }),
        &["q7", "q8", "q9"],
    )
    .await;
    assert_eq!(done["summary"]["correct"], 1);
    assert_eq!(done["summary"]["accuracy"], 25.0);

    play_session(
        &app,
        "aluno-1",
        json!({ "mode": "area", "filter": { "area": "Direito Constitucional" } }),
        &[],
    )
    .await;

    let (status, overview) = call(&app, "GET", "/api/v1/stats/me", "aluno-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["sessions_started"], 2);
    assert_eq!(overview["sessions_completed"], 2);
    assert_eq!(overview["questions_answered"], 10);
    assert_eq!(overview["correct_answers"], 7);
    assert_eq!(overview["accuracy"], 70.0);
    assert_eq!(overview["areas"][0]["area"], "Direito Civil");
    assert_eq!(overview["areas"][1]["accuracy"], 100.0);
    assert_eq!(overview["recent_sessions"].as_array().unwrap().len(), 2);

    let (_, history) = call(&app, "GET", "/api/v1/stats/questions/q7", "aluno-1", None).await;
    assert_eq!(history["times_wrong"], 1);
    assert_eq!(history["times_correct"], 0);
}

#[tokio::test]
async fn test_review_errors_session_draws_missed_questions() {
    let app = common::create_blocking_test_app().await;

    play_session(
        &app,
        "aluno-2",
        json!({ "mode": "area", "filter": { "area": "Direito Civil" } }),
        &["q8", "q10"],
    )
    .await;

    let (status, session) = call(
        &app,
        "POST",
        "/api/v1/sessions",
        "aluno-2",
        Some(json!({ "mode": "review_errors" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["total_questions"], 2);
    let current = session["current_question_id"].as_str().unwrap();
    assert!(current == "q8" || current == "q10");
}

#[tokio::test]
async fn test_new_user_has_empty_overview() {
    let app = common::create_test_app().await;
    let (status, overview) = call(&app, "GET", "/api/v1/stats/me", "novato", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["questions_answered"], 0);
    assert_eq!(overview["accuracy"], 0.0);
    assert!(overview["areas"].as_array().unwrap().is_empty());
}
