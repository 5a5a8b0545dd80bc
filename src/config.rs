use std::borrow::Cow;

use time::Duration;

use crate::{
    SameSite,
    error::{Error, Result},
    format::check_cookie_name,
};

pub const DEFAULT_COOKIE_NAME: &str = "session_state";
pub const DEFAULT_DURATION: Duration = Duration::hours(24);
pub const DEFAULT_ACTIVE_DURATION: Duration = Duration::minutes(5);

#[derive(Debug, Clone)]
pub struct ClientSessionConfig {
    pub(crate) name: Cow<'static, str>,
    pub(crate) request_key: Option<Cow<'static, str>>,
    pub(crate) duration: Duration,
    pub(crate) active_duration: Duration,
    pub(crate) http_only: bool,
    pub(crate) secure: bool,
    pub(crate) max_age: Option<Duration>,
    pub(crate) ephemeral: bool,
    pub(crate) path: Cow<'static, str>,
    pub(crate) domain: Option<Cow<'static, str>>,
    pub(crate) same_site: Option<SameSite>,
    pub(crate) max_cookie_bytes: usize,
    pub(crate) trust_proxy: bool,
}

impl Default for ClientSessionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.into(),
            request_key: None,
            duration: DEFAULT_DURATION,
            active_duration: DEFAULT_ACTIVE_DURATION,
            http_only: true,
            secure: false,
            max_age: None,
            ephemeral: false,
            path: "/".into(),
            domain: None,
            same_site: None,
            max_cookie_bytes: 4096,
            trust_proxy: false,
        }
    }
}

impl ClientSessionConfig {
    #[must_use]
    pub fn with_name<N: Into<Cow<'static, str>>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Key under which the session is registered in [`crate::Sessions`]. Defaults to the
    /// cookie name.
    #[must_use]
    pub fn with_request_key<K: Into<Cow<'static, str>>>(mut self, request_key: K) -> Self {
        self.request_key = Some(request_key.into());
        self
    }

    /// How long a session stays valid after it was created or last renewed.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// A session accessed less than this long before it expires is extended by the same amount.
    /// Zero disables renewal.
    #[must_use]
    pub fn with_active_duration(mut self, active_duration: Duration) -> Self {
        self.active_duration = active_duration;
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Require a secure transport. Requests arriving over plain HTTP fail unless
    /// [`Self::with_trust_proxy`] is set.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Fixed client-side cookie lifetime, counted from the start of each request that writes the
    /// cookie. Cannot be combined with [`Self::with_ephemeral`].
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    #[must_use]
    pub fn without_max_age(mut self) -> Self {
        self.max_age = None;
        self
    }

    /// Emit cookies without an expiry so the browser drops them when it closes.
    #[must_use]
    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    #[must_use]
    pub fn with_path<P: Into<Cow<'static, str>>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_domain<D: Into<Cow<'static, str>>>(mut self, domain: D) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn without_domain(mut self) -> Self {
        self.domain = None;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    #[must_use]
    pub fn with_max_cookie_bytes(mut self, max_cookie_bytes: usize) -> Self {
        self.max_cookie_bytes = max_cookie_bytes;
        self
    }

    /// Treat every request as arriving over a secure transport, for deployments where TLS is
    /// terminated by a trusted reverse proxy.
    #[must_use]
    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn request_key(&self) -> &str {
        self.request_key.as_deref().unwrap_or(&self.name)
    }

    /// Checks the options that can be checked without a request.
    pub fn validate(&self) -> Result<()> {
        check_cookie_name(&self.name)?;
        if self.ephemeral && self.max_age.is_some() {
            return Err(Error::config(
                "an ephemeral cookie cannot have a max age",
            ));
        }
        Ok(())
    }

    pub(crate) fn duration_ms(&self) -> u64 {
        millis(self.duration)
    }

    pub(crate) fn active_duration_ms(&self) -> u64 {
        millis(self.active_duration)
    }
}

/// Whole milliseconds in `duration`, negative durations counting as zero.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.whole_milliseconds()).unwrap_or(0)
}
