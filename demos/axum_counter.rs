use std::net::SocketAddr;

use axum::{Extension, Router, routing::get};
use time::Duration;
use tower_client_sessions::{ClientSessionConfig, ClientSessionLayer, KeyMaterial, SameSite, Session};

async fn index(Extension(session): Extension<Session>) -> String {
    let n: usize = session
        .get("n")
        .expect("session get succeeds")
        .unwrap_or(0);
    session.insert("n", n + 1).expect("session insert succeeds");
    format!("n={n}")
}

async fn logout(Extension(session): Extension<Session>) -> &'static str {
    session.destroy();
    "bye"
}

#[tokio::main]
async fn main() {
    let secret = std::env::var("SESSION_SECRET").unwrap_or_else(|_| "change me".to_string());
    let keys = KeyMaterial::from_secret(secret).expect("session keys derive successfully");
    let session_config = ClientSessionConfig::default()
        // Default: "session_state"
        .with_name("session")
        // Default: true
        .with_http_only(true)
        // Default: unset
        .with_same_site(SameSite::Lax)
        // Default: 24 hours
        .with_duration(Duration::hours(1))
        // Default: 5 minutes
        .with_active_duration(Duration::minutes(10))
        // Default: false (requires https or trust_proxy when enabled)
        .with_secure(false)
        // Default: "/"
        .with_path("/")
        // Default: 4096
        .with_max_cookie_bytes(4096);
    let session_layer = ClientSessionLayer::new(keys)
        .try_with_config(session_config)
        .expect("session config is valid");

    let app = Router::new()
        .route("/", get(index))
        .route("/logout", get(logout))
        .layer(session_layer);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("tcp listener binds successfully");
    let local_addr = listener.local_addr().expect("local address is available");
    println!("listening at http://{local_addr}");

    axum::serve(listener, app)
        .await
        .expect("server runs successfully");
}
