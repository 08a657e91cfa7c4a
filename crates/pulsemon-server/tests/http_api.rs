mod common;

use axum::http::StatusCode;
use common::{build_app, build_app_in, get, post_json, send, TestOptions};
use pulsemon_crypto::{Decryptor, Encryptor};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

#[tokio::test]
async fn gauge_post_then_get_returns_the_value() {
    let ctx = build_app(TestOptions::default());

    let (status, _) = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "Alloc", "type": "gauge", "value": 1.5}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(&ctx.app, "/value/", &json!({"id": "Alloc"})).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["type"], "gauge");
    assert_eq!(body["value"], 1.5);
}

#[tokio::test]
async fn counter_posts_accumulate() {
    let ctx = build_app(TestOptions::default());

    for delta in [3, 2] {
        let (status, _) = post_json(
            &ctx.app,
            "/update/",
            &json!({"id": "PollCount", "type": "counter", "delta": delta}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = post_json(&ctx.app, "/value/", &json!({"id": "PollCount"})).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["delta"], 5);
}

#[tokio::test]
async fn keyed_update_accepts_the_known_tag_and_rejects_a_flipped_one() {
    let ctx = build_app(TestOptions {
        key: Some("testkey".to_string()),
        ..TestOptions::default()
    });
    let good = "a2bc398d457f8e417dce8776440f230519f0ee5e2a0cf96130cc631272a9987b";

    let (status, _) = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "Alloc", "type": "gauge", "value": 354872, "hash": good}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut flipped = good.to_string();
    flipped.replace_range(..1, "c");
    let (status, _) = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "Alloc", "type": "gauge", "value": 354872, "hash": flipped}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn keyed_get_returns_a_fresh_tag() {
    let ctx = build_app(TestOptions {
        key: Some("testkey".to_string()),
        ..TestOptions::default()
    });
    ctx.service
        .update_one(pulsemon_common::types::Metric::gauge("Alloc", 354872.0));

    let (status, body) = post_json(&ctx.app, "/value/", &json!({"id": "Alloc"})).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        body["hash"],
        "a2bc398d457f8e417dce8776440f230519f0ee5e2a0cf96130cc631272a9987b"
    );
}

#[tokio::test]
async fn trusted_subnet_rejects_outsiders_and_leaves_the_table_unchanged() {
    let ctx = build_app(TestOptions {
        trusted: Some("10.0.0.0/8".to_string()),
        ..TestOptions::default()
    });
    let payload = serde_json::to_vec(&json!({"id": "Alloc", "type": "gauge", "value": 1.0})).unwrap();

    // Declared source outside the subnet.
    let (status, _) = send(
        &ctx.app,
        "POST",
        "/update/",
        &[("X-Real-Ip", "127.0.0.1")],
        payload.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(ctx.service.get("Alloc").is_none());

    // No declared source at all.
    let (status, _) = send(&ctx.app, "POST", "/update/", &[], payload).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(ctx.service.get("Alloc").is_none());
}

#[tokio::test]
async fn trusted_subnet_admits_members() {
    let ctx = build_app(TestOptions {
        trusted: Some("127.0.0.0/8".to_string()),
        ..TestOptions::default()
    });
    let payload = serde_json::to_vec(&json!({"id": "Alloc", "type": "gauge", "value": 1.0})).unwrap();

    let (status, _) = send(
        &ctx.app,
        "POST",
        "/update/",
        &[("X-Real-Ip", "127.0.0.1")],
        payload,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(ctx.service.get("Alloc").is_some());
}

#[tokio::test]
async fn unknown_type_is_rejected() {
    let ctx = build_app(TestOptions::default());
    let (status, _) = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "x", "type": "timer", "value": 1.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_batch_is_an_accepted_noop() {
    let ctx = build_app(TestOptions::default());
    let (status, _) = post_json(&ctx.app, "/updates/", &json!([])).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ctx.service.list().is_empty());
}

#[tokio::test]
async fn batch_merges_in_list_order() {
    let ctx = build_app(TestOptions::default());
    let (status, _) = post_json(
        &ctx.app,
        "/updates/",
        &json!([
            {"id": "PollCount", "type": "counter", "delta": 1},
            {"id": "PollCount", "type": "counter", "delta": 2},
            {"id": "Alloc", "type": "gauge", "value": 9.0}
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = post_json(&ctx.app, "/value/", &json!({"id": "PollCount"})).await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["delta"], 3);
}

#[tokio::test]
async fn legacy_text_path() {
    let ctx = build_app(TestOptions::default());

    let (status, _) = send(&ctx.app, "POST", "/update/gauge/Test/6464.5", &[], vec![]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&ctx.app, "POST", "/update/counter/Test2/28", &[], vec![]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&ctx.app, "POST", "/update/counter/Test2/aaa", &[], vec![]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&ctx.app, "POST", "/update/timer/Test3/1", &[], vec![]).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);

    let (status, _) = send(&ctx.app, "POST", "/update/gauge", &[], vec![]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = post_json(&ctx.app, "/value/", &json!({"id": "Test"})).await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["value"], 6464.5);
}

#[tokio::test]
async fn missing_metric_is_not_found() {
    let ctx = build_app(TestOptions::default());
    let (status, _) = post_json(&ctx.app, "/value/", &json!({"id": "nope"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ping_reports_storage_health() {
    let ctx = build_app(TestOptions::default());
    let (status, _) = get(&ctx.app, "/ping").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn list_page_shows_every_metric() {
    let ctx = build_app(TestOptions::default());
    post_json(
        &ctx.app,
        "/updates/",
        &json!([
            {"id": "Alloc", "type": "gauge", "value": 1.5},
            {"id": "PollCount", "type": "counter", "delta": 4}
        ]),
    )
    .await;

    let (status, body) = get(&ctx.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(body).unwrap();
    assert!(page.contains("Alloc"));
    assert!(page.contains("PollCount"));
    assert!(page.contains("1.5"));
}

#[tokio::test]
async fn restart_with_restore_observes_the_previous_table() {
    let ctx = build_app(TestOptions::default());
    post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "Alloc", "type": "gauge", "value": 42.5}),
    )
    .await;
    post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "PollCount", "type": "counter", "delta": 7}),
    )
    .await;
    let before: Vec<_> = ctx.service.list();
    let dir = ctx.dir;

    let restarted = build_app_in(
        dir,
        TestOptions {
            restore: true,
            ..TestOptions::default()
        },
    );
    let after = restarted.service.list();
    assert_eq!(after.len(), before.len());
    let (_, body) = post_json(&restarted.app, "/value/", &json!({"id": "Alloc"})).await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["value"], 42.5);
    let (_, body) = post_json(&restarted.app, "/value/", &json!({"id": "PollCount"})).await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["delta"], 7);
}

#[tokio::test]
async fn sealed_bodies_are_decrypted_and_garbage_is_rejected() {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let public = RsaPublicKey::from(&private);
    let encryptor =
        Encryptor::from_pem(&public.to_public_key_pem(LineEnding::LF).unwrap()).unwrap();
    let decryptor =
        Decryptor::from_pem(private.to_pkcs1_pem(LineEnding::LF).unwrap().as_str()).unwrap();

    let ctx = build_app(TestOptions {
        decryptor: Some(decryptor),
        ..TestOptions::default()
    });

    let plain = serde_json::to_vec(&json!({"id": "Alloc", "type": "gauge", "value": 3.5})).unwrap();
    let sealed = encryptor.encrypt(&plain).unwrap();
    let (status, _) = send(&ctx.app, "POST", "/update/", &[], sealed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        ctx.service.get("Alloc").unwrap().value,
        pulsemon_common::types::MetricValue::Gauge(3.5)
    );

    // An unsealed body cannot decrypt and must be rejected outright.
    let (status, _) = send(&ctx.app, "POST", "/update/", &[], vec![0u8; 256]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
