// Tests for the validity window carried in the token and the sliding renewal applied when a
// session is read close to its end.
mod common;

use axum::body::Body;
use http::{Request, Response, header};
use serde_json::json;
use time::Duration;
use tower::{ServiceBuilder, ServiceExt as _};

use tower_client_sessions::{ClientSessionConfig, Session};

async fn read_handler(req: Request<Body>) -> Result<Response<Body>, std::convert::Infallible> {
    let session = req
        .extensions()
        .get::<Session>()
        .cloned()
        .expect("request includes Session extension");

    Ok(Response::new(Body::from(format!("{:?}", session.get_value("foo")))))
}

fn config(duration_ms: i64, active_ms: i64) -> ClientSessionConfig {
    ClientSessionConfig::default()
        .with_name("session")
        .with_duration(Duration::milliseconds(duration_ms))
        .with_active_duration(Duration::milliseconds(active_ms))
}

async fn read_with_cookie(config: ClientSessionConfig, cookie: String) -> Response<Body> {
    let (_keys, layer) = common::make_layer(config);
    let svc = ServiceBuilder::new().layer(layer).service_fn(read_handler);

    let req = Request::builder()
        .header(header::COOKIE, format!("session={cookie}"))
        .body(Body::empty())
        .expect("request builds successfully");
    svc.oneshot(req).await.expect("service call succeeds")
}

#[tokio::test]
async fn fresh_session_is_read_unchanged() {
    // Exercise: a token well within its window, read with renewal disabled.
    // Expectation: the content is visible and the cookie is left alone.
    let token = common::token(
        &common::keys(),
        "session",
        json!({"foo": "bar"}),
        500,
        common::now_millis() - 200,
    );
    let res = read_with_cookie(config(500, 0), token).await;

    assert!(res.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(
        common::body_string(res.into_body()).await,
        r#"Some(String("bar"))"#
    );
}

#[tokio::test]
async fn expired_session_is_reset() {
    // Exercise: a token whose window ended before the request.
    // Expectation: the content is gone and an empty session with a new window is written.
    let before = common::now_millis();
    let token = common::token(
        &common::keys(),
        "session",
        json!({"foo": "bar"}),
        500,
        before - 800,
    );
    let res = read_with_cookie(config(500, 0), token).await;

    let session_cookie = common::get_session_cookie(&res);
    let decoded = common::decode_cookie(&common::keys(), &session_cookie);
    assert!(decoded.content.is_empty());
    assert!(decoded.created_at >= before);
    assert_eq!(decoded.duration, 500);
    assert_eq!(common::body_string(res.into_body()).await, "None");
}

#[tokio::test]
async fn session_near_expiry_is_renewed() {
    // Exercise: a token with 100ms left, read while the renewal threshold is 500ms.
    // Expectation: createdAt moves forward by the threshold and the content is kept.
    let created_at = common::now_millis() - 200;
    let token = common::token(
        &common::keys(),
        "session",
        json!({"foo": "bar"}),
        300,
        created_at,
    );
    let res = read_with_cookie(config(300, 500), token).await;

    let session_cookie = common::get_session_cookie(&res);
    let decoded = common::decode_cookie(&common::keys(), &session_cookie);
    assert_eq!(decoded.created_at, created_at + 500);
    assert_eq!(decoded.duration, 300);
    assert_eq!(decoded.content.get("foo"), Some(&json!("bar")));
    assert_eq!(
        common::body_string(res.into_body()).await,
        r#"Some(String("bar"))"#
    );
}

#[tokio::test]
async fn token_duration_wins_over_config() {
    // Exercise: the token carries a longer window than the layer is configured with.
    // Expectation: the token's own window decides validity.
    let token = common::token(
        &common::keys(),
        "session",
        json!({"foo": 1}),
        60_000,
        common::now_millis() - 10_000,
    );
    let res = read_with_cookie(config(1_000, 0), token).await;

    assert!(res.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(common::body_string(res.into_body()).await, "Some(Number(1))");
}

#[tokio::test]
async fn expires_attribute_tracks_window() {
    // Exercise: a write on a fresh session.
    // Expectation: Expires lands one second after createdAt + duration.
    let (keys, layer) = common::make_layer(config(3_600_000, 0));
    let svc = ServiceBuilder::new()
        .layer(layer)
        .service_fn(common::handler);

    let req = Request::builder()
        .body(Body::empty())
        .expect("request builds successfully");
    let res = svc.oneshot(req).await.expect("service call succeeds");

    let session_cookie = common::get_session_cookie(&res);
    let decoded = common::decode_cookie(&keys, &session_cookie);
    let expires = session_cookie
        .expires_datetime()
        .expect("session cookie has expires");
    let expected_ms = i128::from(decoded.created_at + 3_600_000 + 1_000);
    let actual_ms = expires.unix_timestamp_nanos() / 1_000_000;
    // Expires is rendered with whole-second precision
    assert!((actual_ms - expected_ms).abs() < 1_000);
}

#[tokio::test]
async fn renewal_chain_keeps_active_session_alive() {
    // Exercise: a 300ms session with a 500ms renewal threshold, read repeatedly with real pauses,
    // then left idle for longer than duration + threshold.
    // Expectation: each read renews the token by 500ms and the content outlives the original
    // window; after the idle gap the session comes back empty.
    let (keys, layer) = common::make_layer(config(300, 500));
    let svc = ServiceBuilder::new().layer(layer).service_fn(read_handler);

    let started = common::now_millis();
    let mut cookie = common::token(&keys, "session", json!({"foo": "bar"}), 300, started);
    let mut created_at = started;

    for pause in [200, 400, 400] {
        tokio::time::sleep(std::time::Duration::from_millis(pause)).await;

        let req = Request::builder()
            .header(header::COOKIE, format!("session={cookie}"))
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc
            .clone()
            .oneshot(req)
            .await
            .expect("service call succeeds");

        let session_cookie = common::get_session_cookie(&res);
        let decoded = common::decode_cookie(&keys, &session_cookie);
        assert_eq!(decoded.created_at, created_at + 500);
        assert_eq!(decoded.duration, 300);
        assert_eq!(
            common::body_string(res.into_body()).await,
            r#"Some(String("bar"))"#
        );

        created_at = decoded.created_at;
        cookie = session_cookie.value().to_owned();
    }
    assert!(common::now_millis() > started + 300);

    tokio::time::sleep(std::time::Duration::from_millis(1_000)).await;

    let req = Request::builder()
        .header(header::COOKIE, format!("session={cookie}"))
        .body(Body::empty())
        .expect("request builds successfully");
    let res = svc.oneshot(req).await.expect("service call succeeds");

    let session_cookie = common::get_session_cookie(&res);
    assert!(common::decode_cookie(&keys, &session_cookie).content.is_empty());
    assert_eq!(common::body_string(res.into_body()).await, "None");
}
