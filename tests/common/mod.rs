#![allow(dead_code)]

// Shared helpers for integration tests.
//
// Cookies are parsed with `tower_cookies::Cookie` to match what the middleware emits in
// `Set-Cookie`, and sent back as a bare `name=value` pair the way browsers do.
use std::convert::Infallible;

use axum::body::Body;
use http::{HeaderMap, Request, Response, header};
use http_body_util::BodyExt as _;
use serde_json::Value;
use tower_client_sessions::{
    ClientSessionConfig, ClientSessionLayer, KeyMaterial, Session,
    format::{self, DecodedToken},
};
use tower_cookies::Cookie;

pub const SECRET: &str = "integration test secret";

pub async fn body_string(body: Body) -> String {
    let bytes = body
        .collect()
        .await
        .expect("body collects successfully")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Basic handler used by many tests: write a single key into the session.
    let session = req
        .extensions()
        .get::<Session>()
        .cloned()
        .expect("request includes Session extension");

    session.insert("foo", 42).expect("session insert succeeds");

    Ok(Response::new(Body::empty()))
}

pub async fn noop_handler(_: Request<Body>) -> Result<Response<Body>, Infallible> {
    Ok(Response::new(Body::empty()))
}

pub fn keys() -> KeyMaterial {
    KeyMaterial::from_secret(SECRET).expect("valid secret")
}

pub fn make_layer(config: ClientSessionConfig) -> (KeyMaterial, ClientSessionLayer) {
    // Return the keys alongside the layer for tests that open cookie values themselves.
    let keys = keys();
    let layer = ClientSessionLayer::new(keys.clone()).with_config(config);
    (keys, layer)
}

pub fn get_session_cookie(res: &Response<Body>) -> Cookie<'static> {
    get_session_cookie_from_headers(res.headers())
}

pub fn get_session_cookie_from_headers(headers: &HeaderMap) -> Cookie<'static> {
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .expect("response includes set-cookie header");
    let set_cookie = set_cookie
        .to_str()
        .expect("set-cookie header is valid utf-8");
    Cookie::parse_encoded(set_cookie)
        .expect("set-cookie parses successfully")
        .into_owned()
}

pub fn all_session_cookies(headers: &HeaderMap) -> Vec<Cookie<'static>> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| {
            let value = value.to_str().expect("set-cookie header is valid utf-8");
            Cookie::parse_encoded(value)
                .expect("set-cookie parses successfully")
                .into_owned()
        })
        .collect()
}

pub fn cookie_header_value(cookie: &Cookie<'_>) -> String {
    format!("{}={}", cookie.name(), cookie.value())
}

pub fn decode_cookie(keys: &KeyMaterial, cookie: &Cookie<'_>) -> DecodedToken {
    format::decode(keys, cookie.name(), cookie.value())
        .expect("cookie name is valid")
        .expect("cookie value decodes successfully")
}

/// Seal `content` as if it had been written at `created_at` (unix milliseconds).
pub fn token(keys: &KeyMaterial, name: &str, content: Value, duration: u64, created_at: u64) -> String {
    let Value::Object(content) = content else {
        panic!("session content is an object");
    };
    format::encode(keys, name, &content, Some(duration), Some(created_at))
        .expect("token encodes successfully")
}

pub fn now_millis() -> u64 {
    let now = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    u64::try_from(now).expect("clock is after the epoch")
}
