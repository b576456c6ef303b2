use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use globalchat::{
    app,
    platform::{memory::MemoryPlatform, ChannelId, TenantId},
    registry::{ChannelRegistry, MemoryStore},
    relay::{RelayConfig, RelayService},
    AppState,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const TOKEN: &str = "letmein";

struct TestApp {
    router: Router,
    platform: Arc<MemoryPlatform>,
    relay: RelayService,
}

async fn test_app() -> TestApp {
    let platform = Arc::new(MemoryPlatform::new());
    platform.add_tenant(TenantId(1), "A");
    platform.add_tenant(TenantId(2), "B");
    let registry = Arc::new(
        ChannelRegistry::load(Arc::new(MemoryStore::default()))
            .await
            .unwrap(),
    );
    let relay = RelayService::new(platform.clone(), registry, RelayConfig::default());
    let router = app(AppState::new(relay.clone(), Some(TOKEN.to_owned())));
    TestApp {
        router,
        platform,
        relay,
    }
}

impl TestApp {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
        let body = match body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(&self, body: Value) -> String {
        let (status, reply) = self.send(Method::POST, "/admin/channels", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["error"], Value::Null);
        reply["data"]["id"].as_str().unwrap().to_owned()
    }
}

#[tokio::test]
async fn requests_without_the_token_are_rejected() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/channels")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn link_errors_are_reported_as_messages() {
    let app = test_app().await;
    let id = app
        .create(json!({ "actor": 1, "name": "vault", "key_required": true, "key": "secret" }))
        .await;
    let links = format!("/admin/channels/{id}/links");

    let (_, reply) = app
        .send(Method::POST, &links, Some(json!({ "tenant": 1, "channel": 10, "key": "nope" })))
        .await;
    assert!(reply["error"].as_str().is_some());

    let (_, reply) = app
        .send(Method::POST, &links, Some(json!({ "tenant": 1, "channel": 10, "key": "secret" })))
        .await;
    assert_eq!(reply, json!({ "error": null }));

    let (_, reply) = app
        .send(Method::POST, &links, Some(json!({ "tenant": 2, "channel": 10, "key": "secret" })))
        .await;
    assert!(reply["error"].as_str().is_some());

    let (_, reply) = app
        .send(Method::POST, "/admin/channels/missing/links", Some(json!({ "tenant": 2, "channel": 20 })))
        .await;
    assert!(reply["error"].as_str().is_some());
}

#[tokio::test]
async fn listings_hide_unlisted_channels_and_keys() {
    let app = test_app().await;
    app.create(json!({ "actor": 1, "name": "open" })).await;
    app.create(json!({ "actor": 1, "name": "vault", "key_required": true, "key": "secret" }))
        .await;
    app.create(json!({ "actor": 1, "name": "hidden", "visibility": "unlisted" }))
        .await;

    let (_, reply) = app.send(Method::GET, "/admin/channels", None).await;
    let listed = reply["data"].as_array().unwrap();
    let names: Vec<_> = listed.iter().map(|gc| gc["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["open", "vault"]);
    assert!(listed.iter().all(|gc| gc["key"].is_null()));
}

#[tokio::test]
async fn settings_and_staff_changes_need_the_right_role() {
    let app = test_app().await;
    let id = app.create(json!({ "actor": 1, "name": "lobby" })).await;
    let settings = format!("/admin/channels/{id}/settings");
    let staff = format!("/admin/channels/{id}/staff");

    let rules = json!({ "actor": 5, "setting": "rules", "rules": ["be kind"] });
    let (_, reply) = app.send(Method::PUT, &settings, Some(rules.clone())).await;
    assert!(reply["error"].as_str().is_some());

    let (_, reply) = app
        .send(Method::PUT, &staff, Some(json!({ "actor": 1, "user": 5, "change": "add_co_owner" })))
        .await;
    assert_eq!(reply["error"], Value::Null);

    let (_, reply) = app.send(Method::PUT, &settings, Some(rules)).await;
    assert_eq!(reply["error"], Value::Null);
    assert_eq!(app.relay.registry().get(&id).unwrap().rules, vec!["be kind".to_owned()]);

    let (_, reply) = app
        .send(Method::PUT, &staff, Some(json!({ "actor": 5, "user": 6, "change": "transfer_ownership" })))
        .await;
    assert!(reply["error"].as_str().is_some());
}

#[tokio::test]
async fn moderation_notifies_the_tenant_and_records_warnings() {
    let app = test_app().await;
    let id = app.create(json!({ "actor": 1, "name": "lobby" })).await;
    app.send(
        Method::POST,
        &format!("/admin/channels/{id}/links"),
        Some(json!({ "tenant": 2, "channel": 20 })),
    )
    .await;
    let moderation = format!("/admin/channels/{id}/moderation");

    let (_, reply) = app
        .send(Method::POST, &moderation, Some(json!({ "actor": 9, "tenant": 2, "action": "warn", "reason": "spam" })))
        .await;
    assert!(reply["error"].as_str().is_some());

    let (_, reply) = app
        .send(Method::POST, &moderation, Some(json!({ "actor": 1, "tenant": 2, "action": "warn", "reason": "spam" })))
        .await;
    assert_eq!(reply["data"]["warnings"], json!(1));
    assert_eq!(app.platform.messages_in(ChannelId(20)).len(), 1);

    let (_, reply) = app
        .send(Method::GET, &format!("/admin/channels/{id}/warnings/2"), None)
        .await;
    assert_eq!(reply["data"], json!(["spam"]));

    let (_, reply) = app
        .send(Method::POST, &moderation, Some(json!({ "actor": 1, "tenant": 2, "action": "ban" })))
        .await;
    assert_eq!(reply, json!({ "error": null }));
    assert!(app.relay.registry().global_for_channel(ChannelId(20)).is_none());
}

#[tokio::test]
async fn events_drive_the_relay() {
    let app = test_app().await;
    let id = app.create(json!({ "actor": 1, "name": "lobby" })).await;
    for (tenant, channel) in [(1, 10), (2, 20)] {
        app.send(
            Method::POST,
            &format!("/admin/channels/{id}/links"),
            Some(json!({ "tenant": tenant, "channel": channel })),
        )
        .await;
    }

    let message = app.platform.post(ChannelId(10), "u1", "hello");
    let event = json!({
        "channel": 10,
        "message": message.0,
        "author": { "id": 42, "username": "u1" },
        "content": "hello",
    });
    let (status, _) = app.send(Method::POST, "/events/message", Some(event)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // The relay runs after the reply.
    for _ in 0..100 {
        if !app.platform.messages_in(ChannelId(20)).is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    let copies = app.platform.messages_in(ChannelId(20));
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].content, "hello");

    let (status, _) = app
        .send(Method::POST, "/events/permissions", Some(json!({ "channel": 20, "granted": [] })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
