mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{harness, token};
use story_comments_api::build_router;

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_request(jwt: &str, story_id: Uuid, content: &str) -> Request<Body> {
    post_comment(
        jwt,
        json!({
            "content": content,
            "target": { "storyId": story_id, "type": "story" },
        }),
    )
}

fn post_comment(jwt: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/comments")
        .header(header::AUTHORIZATION, format!("Bearer {jwt}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_backends() {
    let h = harness();
    let app = build_router(h.state.clone());
    let res = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["cache"], "memory");
    assert_eq!(body["cacheOk"], true);
}

#[tokio::test]
async fn create_requires_authentication() {
    let h = harness();
    let app = build_router(h.state.clone());
    let payload = json!({
        "content": "hello there",
        "target": { "storyId": h.story_id, "type": "story" },
    });
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/comments")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sixth_comment_in_a_minute_is_rate_limited() {
    let h = harness();
    let app = build_router(h.state.clone());
    let jwt = token(Uuid::new_v4(), "user");

    for i in 0..5 {
        let res = app
            .clone()
            .oneshot(create_request(&jwt, h.story_id, &format!("Thoughts on part {i}")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED, "comment {i}");
    }

    let res = app
        .clone()
        .oneshot(create_request(&jwt, h.story_id, "One more thought"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(res).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn duplicate_content_is_rejected() {
    let h = harness();
    let app = build_router(h.state.clone());
    let jwt = token(Uuid::new_v4(), "user");

    let first = app
        .clone()
        .oneshot(create_request(&jwt, h.story_id, "Same words twice"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(create_request(&jwt, h.story_id, "Same words twice"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn duplicate_quoted_reply_is_rejected() {
    let h = harness();
    let (_, _, deep) = h.three_levels().await;
    let app = build_router(h.state.clone());
    let jwt = token(Uuid::new_v4(), "user");
    let reply = || {
        post_comment(
            &jwt,
            json!({
                "content": "Strongly disagree here",
                "target": { "storyId": h.story_id, "type": "story" },
                "hierarchy": { "parentId": deep.id },
            }),
        )
    };

    let first = app.clone().oneshot(reply()).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let body = body_json(first).await;
    assert!(body["data"]["comment"]["content"]["original"]
        .as_str()
        .is_some_and(|s| s.starts_with("@carol: ")));

    let second = app.oneshot(reply()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn malformed_bodies_use_the_error_envelope() {
    let h = harness();
    let app = build_router(h.state.clone());
    let jwt = token(Uuid::new_v4(), "user");

    let res = app
        .clone()
        .oneshot(post_comment(
            &jwt,
            json!({
                "content": "A perfectly normal remark",
                "target": { "storyId": h.story_id, "type": "novel" },
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = body_json(res).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());

    let res = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/comments?storyId={}&page=first", h.story_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["success"], false);
}

#[tokio::test]
async fn shouting_is_rejected_before_storage() {
    let h = harness();
    let app = build_router(h.state.clone());
    let jwt = token(Uuid::new_v4(), "user");

    let res = app
        .oneshot(create_request(&jwt, h.story_id, "THIS CHAPTER IS THE WORST"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let h = harness();
    let app = build_router(h.state.clone());

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/comments/queue")
                .header(header::AUTHORIZATION, format!("Bearer {}", token(Uuid::new_v4(), "user")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/comments/queue")
                .header(header::AUTHORIZATION, format!("Bearer {}", token(Uuid::new_v4(), "admin")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn listing_shows_created_comments() {
    let h = harness();
    let app = build_router(h.state.clone());
    let author = Uuid::new_v4();
    h.post(author, "Visible in the listing", None).await;

    let res = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/comments?storyId={}&limit=10", h.story_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", token(author, "user")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["data"][0]["viewer"]["canDelete"], true);
}
