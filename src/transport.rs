use http::{Request, uri::Scheme};
use tower_cookies::Cookies;

use crate::attributes::CookieAttributes;

/// Reads and writes the session cookie for one request.
pub trait CookieTransport {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: String, attributes: &CookieAttributes);
    /// Whether the connection is confidentiality-protected.
    fn is_secure(&self) -> bool;
}

/// Request extension set by whatever terminates TLS to mark the connection as secure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureConnection(pub bool);

/// [`CookieTransport`] over the `tower-cookies` jar of the current request.
#[derive(Debug, Clone)]
pub struct TowerCookies {
    cookies: Cookies,
    secure: bool,
}

impl TowerCookies {
    #[must_use]
    pub fn new(cookies: Cookies, secure: bool) -> Self {
        Self { cookies, secure }
    }
}

impl CookieTransport for TowerCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.cookies
            .get(name)
            .map(|cookie| cookie.value().to_owned())
    }

    fn set(&self, name: &str, value: String, attributes: &CookieAttributes) {
        self.cookies
            .add(attributes.build_cookie(name.to_owned(), value));
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}

pub(crate) fn is_secure_request<B>(req: &Request<B>, trust_proxy: bool) -> bool {
    trust_proxy
        || req.uri().scheme() == Some(&Scheme::HTTPS)
        || req
            .extensions()
            .get::<SecureConnection>()
            .is_some_and(|secure| secure.0)
}
