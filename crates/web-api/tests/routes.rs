mod support;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use support::build_app;

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn health_is_ok() {
    let app = build_app();
    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn self_like_is_a_bad_request() {
    let app = build_app();
    let response = app
        .router
        .oneshot(post_json(
            "/api/v1/matches/like",
            json!({"userId": "alice", "targetUserId": "alice"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn malformed_notify_body_is_a_bad_request() {
    let app = build_app();
    let request = Request::builder()
        .method("POST")
        .uri("/notify/match")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rate_limit_maps_to_too_many_requests() {
    let app = build_app();
    let router = app.router;

    let created = router
        .clone()
        .oneshot(post_json(
            "/api/v1/conversations",
            json!({"creatorId": "alice", "participantIds": ["bob"]}),
        ))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = to_bytes(created.into_body(), usize::MAX).await.expect("body");
    let conversation: Value = serde_json::from_slice(&body).expect("json");
    let room_id = conversation["id"].as_str().expect("room id").to_string();
    let uri = format!("/api/v1/conversations/{room_id}/messages");

    for i in 0..10 {
        let response = router
            .clone()
            .oneshot(post_json(&uri, json!({"senderId": "alice", "content": format!("message {i}")})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = router
        .oneshot(post_json(&uri, json!({"senderId": "alice", "content": "one too many"})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
