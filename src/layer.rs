use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use http::{Request, Response, StatusCode};
use tower_cookies::{CookieManager, Cookies};
use tower_layer::Layer;
use tower_service::Service;

use crate::{
    config::ClientSessionConfig,
    keys::KeyMaterial,
    session::{Session, SessionState, Sessions},
    transport::{TowerCookies, is_secure_request},
};

/// Layer that attaches a [`Session`] backed by an encrypted, signed cookie to every request.
///
/// The session is available as a [`Session`] request extension (the outermost session layer
/// wins) and under its request key in the [`Sessions`] extension.
#[derive(Debug, Clone)]
pub struct ClientSessionLayer {
    keys: Arc<KeyMaterial>,
    config: Arc<ClientSessionConfig>,
}

impl ClientSessionLayer {
    #[must_use]
    pub fn new(keys: KeyMaterial) -> Self {
        Self {
            keys: Arc::new(keys),
            config: Arc::new(ClientSessionConfig::default()),
        }
    }

    /// Use `config` without checking it. An invalid configuration fails every request with a
    /// server error; prefer [`Self::try_with_config`] to catch it at setup.
    #[must_use]
    pub fn with_config(mut self, config: ClientSessionConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Use `config` after checking it, failing with a configuration error.
    pub fn try_with_config(self, config: ClientSessionConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(self.with_config(config))
    }
}

#[derive(Debug, Clone)]
pub struct ClientSessionManager<S> {
    inner: S,
    keys: Arc<KeyMaterial>,
    config: Arc<ClientSessionConfig>,
}

impl<S> Layer<S> for ClientSessionLayer {
    type Service = CookieManager<ClientSessionManager<S>>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieManager::new(ClientSessionManager {
            inner,
            keys: self.keys.clone(),
            config: self.config.clone(),
        })
    }
}

fn internal_error<B: Default>() -> Response<B> {
    let mut res = Response::default();
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res
}

impl<ReqBody, ResBody, S> Service<Request<ReqBody>> for ClientSessionManager<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let keys = self.keys.clone();
        let config = self.config.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(cookies) = req.extensions().get::<Cookies>().cloned() else {
                tracing::error!("missing cookie jar, is the cookie manager layer installed?");
                return Ok(internal_error());
            };

            let request_key = config.request_key().to_owned();
            let mut sessions = req
                .extensions_mut()
                .remove::<Sessions>()
                .unwrap_or_default();
            if sessions.contains(&request_key) {
                tracing::debug!(request_key = %request_key, "session already attached");
                req.extensions_mut().insert(sessions);
                return inner.call(req).await;
            }

            let transport = TowerCookies::new(cookies, is_secure_request(&req, config.trust_proxy));
            let state = match SessionState::from_transport(keys, config, &transport) {
                Ok(state) => state,
                Err(err) => {
                    tracing::error!(err = %err, request_key = %request_key, "client session setup failed");
                    return Ok(internal_error());
                }
            };

            let session = Session::new(state);
            sessions.insert(request_key.clone(), session.clone());
            req.extensions_mut().insert(sessions);
            if req.extensions().get::<Session>().is_none() {
                req.extensions_mut().insert(session.clone());
            }

            let res = inner.call(req).await?;

            if let Err(err) = session.flush(&transport) {
                tracing::error!(err = %err, request_key = %request_key, "client session save failed");
                return Ok(internal_error());
            }

            Ok(res)
        })
    }
}
