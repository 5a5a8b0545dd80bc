//! Attributes of the outgoing session cookie.

use std::borrow::Cow;

use time::{Duration, OffsetDateTime};
use tower_cookies::Cookie;

use crate::{SameSite, config::ClientSessionConfig};

/// Slack added to the default cookie expiry, which is rendered with whole-second precision.
const EXPIRY_SLACK_MS: u64 = 1000;

/// Everything about the outgoing cookie besides its name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    pub expires: Option<OffsetDateTime>,
    pub max_age: Option<Duration>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
    pub path: Cow<'static, str>,
    pub domain: Option<Cow<'static, str>>,
}

impl CookieAttributes {
    /// Combine the configured flags with a session's computed expiry.
    #[must_use]
    pub fn compute(config: &ClientSessionConfig, expires: Option<OffsetDateTime>) -> Self {
        Self {
            expires,
            max_age: config.max_age,
            http_only: config.http_only,
            secure: config.secure,
            same_site: config.same_site,
            path: config.path.clone(),
            domain: config.domain.clone(),
        }
    }

    #[must_use]
    pub fn build_cookie(&self, name: String, value: String) -> Cookie<'static> {
        let mut cookie_builder = Cookie::build((name, value))
            .http_only(self.http_only)
            .secure(self.secure)
            .path(self.path.clone());

        if let Some(same_site) = self.same_site {
            cookie_builder = cookie_builder.same_site(same_site);
        }
        if let Some(expires) = self.expires {
            cookie_builder = cookie_builder.expires(expires);
        }
        if let Some(max_age) = self.max_age {
            cookie_builder = cookie_builder.max_age(max_age);
        }
        if let Some(domain) = self.domain.clone() {
            cookie_builder = cookie_builder.domain(domain);
        }

        cookie_builder.build()
    }
}

/// Expiry of a cookie without a fixed max age: when the session stops being valid, or never for
/// an ephemeral cookie.
pub(crate) fn default_expires(
    ephemeral: bool,
    created_at: u64,
    duration: u64,
) -> Option<OffsetDateTime> {
    if ephemeral {
        return None;
    }
    let at = created_at
        .saturating_add(duration)
        .saturating_add(EXPIRY_SLACK_MS);
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(at) * 1_000_000).ok()
}

/// Expiry for a fixed max age counted from `now`.
pub(crate) fn max_age_expires(now: u64, max_age: Duration) -> Option<OffsetDateTime> {
    let now = OffsetDateTime::from_unix_timestamp_nanos(i128::from(now) * 1_000_000).ok()?;
    now.checked_add(max_age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_expiry_adds_duration_and_slack() {
        let expires = default_expires(false, 1_000, 60_000).expect("in range");
        assert_eq!(expires.unix_timestamp_nanos(), 62_000 * 1_000_000);

        assert!(default_expires(true, 1_000, 60_000).is_none());
    }

    #[test]
    fn max_age_counts_from_now() {
        let expires = max_age_expires(10_000, Duration::seconds(5)).expect("in range");
        assert_eq!(expires.unix_timestamp(), 15);
    }

    #[test]
    fn cookie_carries_configured_flags() {
        let config = ClientSessionConfig::default()
            .with_secure(true)
            .with_http_only(false)
            .with_same_site(SameSite::Lax)
            .with_path("/app")
            .with_domain("example.com")
            .with_max_age(Duration::minutes(10));
        let expires = OffsetDateTime::from_unix_timestamp(2_000_000_000).expect("valid time");
        let attributes = CookieAttributes::compute(&config, Some(expires));

        let cookie = attributes.build_cookie("sid".into(), "token".into());

        assert_eq!(cookie.name(), "sid");
        assert_eq!(cookie.value(), "token");
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(false));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/app"));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.max_age(), Some(Duration::minutes(10)));
        assert_eq!(cookie.expires_datetime(), Some(expires));
    }

    #[test]
    fn ephemeral_cookie_has_no_expiry() {
        let attributes = CookieAttributes::compute(&ClientSessionConfig::default(), None);
        let cookie = attributes.build_cookie("sid".into(), "token".into());

        assert!(cookie.expires().is_none());
        assert!(cookie.max_age().is_none());
        assert_eq!(cookie.same_site(), None);
    }
}
