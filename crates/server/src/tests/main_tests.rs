use super::*;
use axum::{body, body::Body, http::Request};
use serde_json::{json, Value};
use shared::{
    domain::ReviewableKind,
    protocol::{reviewable_update_channel, UpdateAction},
};
use std::time::Duration;
use storage::NewReviewable;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

struct TestApp {
    state: Arc<AppState>,
    moderator: i64,
    member: i64,
}

impl TestApp {
    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn queued_post(&self, topic_id: Option<i64>) -> i64 {
        self.state
            .api
            .storage
            .create_reviewable(&NewReviewable {
                kind: ReviewableKind::QueuedPost,
                topic_id: topic_id.map(TopicId),
                target_id: None,
                created_by: None,
                fields: json!({ "payload": { "raw": "first draft", "title": "A title" } })
                    .as_object()
                    .cloned()
                    .expect("object"),
            })
            .await
            .expect("reviewable")
            .0
    }
}

async fn test_app() -> TestApp {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let moderator = storage.create_user("mod", true).await.expect("moderator");
    let member = storage.create_user("member", false).await.expect("member");
    let bus = MessageBus::new(32);
    let api = ApiContext::new(storage, Arc::new(bus.clone()));
    TestApp {
        state: Arc::new(AppState {
            api,
            bus,
            max_body_bytes: 64 * 1024,
        }),
        moderator: moderator.0,
        member: member.0,
    }
}

async fn send(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => {
            let body = body.to_string();
            builder
                .header("content-type", "application/json")
                .header("content-length", body.len())
                .body(Body::from(body))
        }
        None => builder.body(Body::empty()),
    }
    .expect("request");
    let response = router.oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let app = test_app().await;
    let request = Request::get("/healthz").body(Body::empty()).expect("request");
    let response = app.router().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn update_route_bumps_version_and_echoes_fields() {
    let app = test_app().await;
    let id = app.queued_post(Some(7)).await;

    let (status, body) = send(
        app.router(),
        "PATCH",
        &format!("/reviewables/{id}?user_id={}", app.moderator),
        Some(json!({ "reviewable": { "payload": { "raw": "edited" } }, "version": 0 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 1);
    assert_eq!(body["payload"]["raw"], "edited");
}

#[tokio::test]
async fn stale_update_is_a_conflict() {
    let app = test_app().await;
    let id = app.queued_post(None).await;
    let uri = format!("/reviewables/{id}?user_id={}", app.moderator);
    let edit = json!({ "reviewable": { "payload": { "raw": "edited" } }, "version": 0 });

    let (first, _) = send(app.router(), "PATCH", &uri, Some(edit.clone())).await;
    let (second, body) = send(app.router(), "PATCH", &uri, Some(edit)).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn update_route_maps_access_and_validation_errors() {
    let app = test_app().await;
    let id = app.queued_post(None).await;

    let (status, _) = send(
        app.router(),
        "PATCH",
        &format!("/reviewables/{id}?user_id={}", app.member),
        Some(json!({ "reviewable": { "payload": { "raw": "x" } }, "version": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        app.router(),
        "PATCH",
        &format!("/reviewables/{id}?user_id={}", app.moderator),
        Some(json!({ "reviewable": { "payload": { "raw": "   " } }, "version": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation");
    assert!(!body["errors"].as_array().expect("errors").is_empty());

    let (status, _) = send(
        app.router(),
        "PATCH",
        &format!("/reviewables/{id}"),
        Some(json!({ "reviewable": {}, "version": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        app.router(),
        "PATCH",
        &format!("/reviewables/9999?user_id={}", app.moderator),
        Some(json!({ "reviewable": { "payload": { "raw": "x" } }, "version": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn perform_route_reports_transition_and_conflicts() {
    let app = test_app().await;
    let id = app.queued_post(Some(3)).await;
    let uri = format!("/reviewables/{id}/perform/approve_post?user_id={}", app.moderator);

    let (status, body) = send(app.router(), "PUT", &uri, Some(json!({ "version": 0 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["transition_to"], "approved");
    assert_eq!(body["remove_reviewable_ids"], json!([id]));

    let (status, _) = send(app.router(), "PUT", &uri, Some(json!({ "version": 0 }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn perform_route_rejects_stale_and_unknown_actions() {
    let app = test_app().await;
    let id = app.queued_post(None).await;

    let (status, _) = send(
        app.router(),
        "PUT",
        &format!("/reviewables/{id}/perform/approve_post?user_id={}", app.moderator),
        Some(json!({ "version": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        app.router(),
        "PUT",
        &format!("/reviewables/{id}/perform/launch_rocket?user_id={}", app.moderator),
        Some(json!({ "version": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "invalid_action");
}

#[tokio::test]
async fn perform_route_returns_not_found_for_handled_user_without_target() {
    let app = test_app().await;
    let storage = &app.state.api.storage;
    let id = storage
        .create_reviewable(&NewReviewable {
            kind: ReviewableKind::User,
            topic_id: None,
            target_id: Some(42),
            created_by: None,
            fields: Default::default(),
        })
        .await
        .expect("reviewable");

    let (status, _) = send(
        app.router(),
        "PUT",
        &format!("/reviewables/{}/perform/reject_user?user_id={}", id.0, app.moderator),
        Some(json!({ "version": 0, "send_email": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    storage.clear_target(id).await.expect("clear");

    let (status, body) = send(
        app.router(),
        "PUT",
        &format!("/reviewables/{}/perform/approve_user?user_id={}", id.0, app.moderator),
        Some(json!({ "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn failed_action_is_unprocessable_with_errors() {
    let app = test_app().await;
    let id = app.queued_post(None).await;
    app.state
        .api
        .storage
        .update_fields_if_version(
            ReviewableId(id),
            0,
            json!({ "payload": { "raw": "" } }).as_object().expect("object"),
        )
        .await
        .expect("blank raw");

    let (status, body) = send(
        app.router(),
        "PUT",
        &format!("/reviewables/{id}/perform/approve_post?user_id={}", app.moderator),
        Some(json!({ "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(!body["errors"].as_array().expect("errors").is_empty());
}

#[tokio::test]
async fn current_payload_route_and_alias_return_raw() {
    let app = test_app().await;
    let id = app.queued_post(None).await;

    for path in ["reviewable", "updated-reviewable"] {
        let uri = if path == "reviewable" {
            format!("/reviewable/{id}/current-payload?user_id={}", app.moderator)
        } else {
            format!("/updated-reviewable/{id}?user_id={}", app.moderator)
        };
        let (status, body) = send(app.router(), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["reviewable_queued_post"]["payload"]["raw"], "first draft");
    }
}

#[tokio::test]
async fn list_route_filters_by_topic_and_claims_round_trip() {
    let app = test_app().await;
    let in_topic = app.queued_post(Some(1)).await;
    app.queued_post(Some(2)).await;

    let (status, body) = send(
        app.router(),
        "GET",
        &format!("/reviewables?user_id={}&topic_id=1", app.moderator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body
        .as_array()
        .expect("list")
        .iter()
        .filter_map(|item| item["reviewable_id"].as_i64())
        .collect();
    assert_eq!(ids, vec![in_topic]);

    let claim_uri = format!("/reviewables/{in_topic}/claim?user_id={}", app.moderator);
    let (status, body) = send(app.router(), "POST", &claim_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["claimed_by"], app.moderator);

    let (status, body) = send(app.router(), "DELETE", &claim_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], true);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = test_app().await;
    let id = app.queued_post(None).await;
    let huge = "x".repeat(128 * 1024);

    let (status, _) = send(
        app.router(),
        "PATCH",
        &format!("/reviewables/{id}?user_id={}", app.moderator),
        Some(json!({ "reviewable": { "payload": { "raw": huge } }, "version": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn client_frames_toggle_channel_membership() {
    let mut channels = HashSet::new();
    let connection_id = Uuid::new_v4();

    let reply = handle_client_frame(
        r#"{"type":"subscribe","payload":{"channel":"/reviewable-update/4"}}"#,
        &mut channels,
        connection_id,
    );
    assert!(matches!(reply, Some(ServerFrame::Subscribed { .. })));
    assert!(channels.contains("/reviewable-update/4"));

    let reply = handle_client_frame(
        r#"{"type":"subscribe","payload":{"channel":"/chat/4"}}"#,
        &mut channels,
        connection_id,
    );
    assert!(matches!(reply, Some(ServerFrame::Error(_))));
    assert_eq!(channels.len(), 1);

    handle_client_frame(
        r#"{"type":"unsubscribe","payload":{"channel":"/reviewable-update/4"}}"#,
        &mut channels,
        connection_id,
    );
    assert!(channels.is_empty());
}

async fn next_frame<S>(socket: &mut S) -> ServerFrame
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame before timeout")
            .expect("socket open")
            .expect("frame");
        if let WsMessage::Text(text) = message {
            return serde_json::from_str(&text).expect("server frame");
        }
    }
}

#[tokio::test]
async fn edit_reaches_websocket_subscriber_of_the_topic() {
    let app = test_app().await;
    let id = app.queued_post(Some(11)).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?user_id={}", app.moderator))
            .await
            .expect("connect");
    let channel = reviewable_update_channel(TopicId(11));
    let subscribe = serde_json::to_string(&ClientFrame::Subscribe {
        channel: channel.clone(),
    })
    .expect("frame");
    socket.send(WsMessage::Text(subscribe)).await.expect("send");
    assert!(matches!(next_frame(&mut socket).await, ServerFrame::Subscribed { .. }));

    let (status, _) = send(
        app.router(),
        "PATCH",
        &format!("/reviewables/{id}?user_id={}", app.moderator),
        Some(json!({ "reviewable": { "payload": { "raw": "live edit" } }, "version": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    match next_frame(&mut socket).await {
        ServerFrame::Message { channel: got, data } => {
            assert_eq!(got, channel);
            assert_eq!(data.action, UpdateAction::Edit);
            assert_eq!(data.reviewable_id, ReviewableId(id));
        }
        other => panic!("expected channel message, got {other:?}"),
    }
}

#[tokio::test]
async fn websocket_skips_other_topics_and_rejects_members() {
    let app = test_app().await;
    let other_topic = app.queued_post(Some(21)).await;
    let watched_topic = app.queued_post(Some(22)).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    let member_attempt =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?user_id={}", app.member)).await;
    assert!(member_attempt.is_err());

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?user_id={}", app.moderator))
            .await
            .expect("connect");
    let subscribe = serde_json::to_string(&ClientFrame::Subscribe {
        channel: reviewable_update_channel(TopicId(22)),
    })
    .expect("frame");
    socket.send(WsMessage::Text(subscribe)).await.expect("send");
    next_frame(&mut socket).await;

    for id in [other_topic, watched_topic] {
        let (status, _) = send(
            app.router(),
            "PUT",
            &format!("/reviewables/{id}/perform/reject_post?user_id={}", app.moderator),
            Some(json!({ "version": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    match next_frame(&mut socket).await {
        ServerFrame::Message { data, .. } => {
            assert_eq!(data.action, UpdateAction::Delete);
            assert_eq!(data.reviewable_id, ReviewableId(watched_topic));
        }
        other => panic!("expected channel message, got {other:?}"),
    }
}
