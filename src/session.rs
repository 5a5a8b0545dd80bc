//! Per-request session state and the handle exposed to request handlers.
//!
//! A [`SessionState`] is created for every request, lazily opens the incoming token on first
//! access, applies the sliding-expiration policy, and on [`SessionState::finalize`] seals a new
//! token if anything changed. Reading a session never rewrites the cookie unless the expiration
//! policy itself renewed or reset it.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};

use crate::{
    attributes::{self, CookieAttributes},
    config::{ClientSessionConfig, millis},
    error::{Error, Result},
    format::{self, now_millis},
    keys::KeyMaterial,
    transport::CookieTransport,
};

/// A sealed session ready to be written by the cookie transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingCookie {
    pub name: String,
    pub value: String,
    pub attributes: CookieAttributes,
}

pub struct SessionState {
    keys: Arc<KeyMaterial>,
    config: Arc<ClientSessionConfig>,
    incoming: Option<String>,
    content: Map<String, Value>,
    loaded: bool,
    dirty: bool,
    baseline: String,
    created_at: Option<u64>,
    duration: u64,
    active_duration: u64,
    ephemeral: bool,
    expires: Option<OffsetDateTime>,
    finalized: bool,
}

impl SessionState {
    /// Fails when the configuration is unusable or a secure cookie is required over an insecure
    /// transport.
    pub fn new(
        keys: Arc<KeyMaterial>,
        config: Arc<ClientSessionConfig>,
        incoming: Option<String>,
        secure_transport: bool,
    ) -> Result<Self> {
        config.validate()?;
        if config.secure && !secure_transport {
            return Err(Error::config(
                "a secure cookie requires a secure transport or trust_proxy",
            ));
        }

        let mut state = Self {
            incoming,
            content: Map::new(),
            loaded: false,
            dirty: false,
            baseline: snapshot(&Map::new()),
            created_at: None,
            duration: config.duration_ms(),
            active_duration: config.active_duration_ms(),
            ephemeral: config.ephemeral,
            expires: None,
            finalized: false,
            keys,
            config,
        };
        state.expires = match state.config.max_age {
            Some(max_age) => attributes::max_age_expires(now_millis(), max_age),
            None => attributes::default_expires(state.ephemeral, now_millis(), state.duration),
        };
        Ok(state)
    }

    pub fn from_transport<T: CookieTransport + ?Sized>(
        keys: Arc<KeyMaterial>,
        config: Arc<ClientSessionConfig>,
        transport: &T,
    ) -> Result<Self> {
        let incoming = transport.get(&config.name);
        Self::new(keys, config, incoming, transport.is_secure())
    }

    /// Open the incoming token if that has not happened yet.
    ///
    /// A token that does not open is replaced by a fresh, empty session on reads and writes
    /// alike. Without any cookie a write (`force_reset`) starts a fresh session, while a read
    /// leaves the state untouched and returns `false`.
    pub fn ensure_loaded(&mut self, force_reset: bool) -> bool {
        if self.loaded {
            return true;
        }

        match self.incoming.take() {
            Some(token) => {
                let decoded = format::decode(&self.keys, &self.config.name, &token)
                    .ok()
                    .flatten();
                match decoded {
                    Some(decoded) => self.unbox(decoded),
                    None => {
                        tracing::debug!(cookie = %self.config.name, "invalid session cookie, resetting");
                        self.reset(&[]);
                    }
                }
            }
            None if force_reset => self.reset(&[]),
            None => return false,
        }

        self.loaded = true;
        self.baseline = snapshot(&self.content);
        true
    }

    fn unbox(&mut self, decoded: format::DecodedToken) {
        self.content = decoded.content;
        self.created_at = Some(decoded.created_at);
        self.duration = decoded.duration;
        self.update_default_expires();

        let now = now_millis();
        let expires_at = decoded.created_at.saturating_add(decoded.duration);
        if expires_at < now {
            tracing::debug!(cookie = %self.config.name, "session expired, resetting");
            self.reset(&[]);
        } else if expires_at - now < self.active_duration {
            tracing::debug!(cookie = %self.config.name, "session close to expiry, renewing");
            self.created_at = Some(decoded.created_at.saturating_add(self.active_duration));
            self.dirty = true;
            self.update_default_expires();
        }
    }

    fn update_default_expires(&mut self) {
        if self.config.max_age.is_some() {
            return;
        }
        let created_at = self.created_at.unwrap_or_else(now_millis);
        self.expires = attributes::default_expires(self.ephemeral, created_at, self.duration);
    }

    /// Drop all content except `keys_to_preserve` and restart the validity window.
    pub fn reset(&mut self, keys_to_preserve: &[&str]) {
        self.content
            .retain(|key, _| keys_to_preserve.contains(&key.as_str()));
        self.created_at = Some(now_millis());
        self.duration = self.config.duration_ms();
        self.update_default_expires();
        self.dirty = true;
        self.loaded = true;
    }

    /// Switch to a new validity window starting now, optionally as an ephemeral cookie.
    pub fn set_duration(&mut self, duration: Duration, ephemeral: bool) -> Result<()> {
        if ephemeral && self.config.max_age.is_some() {
            return Err(Error::config(
                "an ephemeral cookie cannot have a max age",
            ));
        }
        self.ensure_loaded(true);
        self.dirty = true;
        self.duration = millis(duration);
        self.created_at = Some(now_millis());
        self.ephemeral = ephemeral;
        self.update_default_expires();
        Ok(())
    }

    pub fn get(&mut self, key: &str) -> Option<&Value> {
        self.ensure_loaded(false);
        self.content.get(key)
    }

    pub fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.ensure_loaded(true);
        self.dirty = true;
        self.content.insert(key, value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if !self.ensure_loaded(false) {
            return None;
        }
        let removed = self.content.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn content(&mut self) -> &Map<String, Value> {
        self.ensure_loaded(false);
        &self.content
    }

    /// Mutable access for nested edits. Changes are picked up by [`Self::is_dirty`].
    pub fn content_mut(&mut self) -> &mut Map<String, Value> {
        self.ensure_loaded(true);
        &mut self.content
    }

    /// Replace the whole content. Only JSON objects are accepted.
    pub fn replace(&mut self, value: Value) -> Result<()> {
        let Value::Object(content) = value else {
            return Err(Error::NotAnObject);
        };
        self.ensure_loaded(true);
        self.content = content;
        self.dirty = true;
        Ok(())
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty || snapshot(&self.content) != self.baseline
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Creation time of the loaded session in unix milliseconds.
    #[must_use]
    pub fn created_at(&self) -> Option<u64> {
        self.created_at
    }

    /// Validity window in milliseconds.
    #[must_use]
    pub fn duration(&self) -> u64 {
        self.duration
    }

    #[must_use]
    pub fn expires(&self) -> Option<OffsetDateTime> {
        self.expires
    }

    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Seal the session if it changed. Runs at most once; later calls return `Ok(None)`.
    pub fn finalize(&mut self) -> Result<Option<OutgoingCookie>> {
        if self.finalized {
            return Ok(None);
        }
        self.finalized = true;

        if !self.is_dirty() {
            return Ok(None);
        }

        let value = format::encode(
            &self.keys,
            &self.config.name,
            &self.content,
            Some(self.duration),
            self.created_at,
        )?;
        if value.len() > self.config.max_cookie_bytes {
            return Err(Error::CookieTooLarge {
                size: value.len(),
                max: self.config.max_cookie_bytes,
            });
        }

        Ok(Some(OutgoingCookie {
            name: self.config.name.to_string(),
            value,
            attributes: CookieAttributes::compute(&self.config, self.expires),
        }))
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("cookie", &self.config.name)
            .field("loaded", &self.loaded)
            .field("dirty", &self.dirty)
            .field("created_at", &self.created_at)
            .field("duration", &self.duration)
            .field("ephemeral", &self.ephemeral)
            .field("expires", &self.expires)
            .finish_non_exhaustive()
    }
}

fn snapshot(content: &Map<String, Value>) -> String {
    // string keys and json values always serialize
    serde_json::to_string(content).unwrap_or_default()
}

/// Handle to the current request's session.
///
/// Cloning is cheap; all clones refer to the same state. Content operations open the incoming
/// cookie on first use.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    #[must_use]
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_value(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.state().get(key).cloned()
    }

    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.state().insert(key.into(), value);
        Ok(())
    }

    pub fn insert_value(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.state().insert(key.into(), value)
    }

    pub fn remove<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.remove_value(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    pub fn remove_value(&self, key: &str) -> Option<Value> {
        self.state().remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.state().content().contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state().content().keys().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().content().is_empty()
    }

    /// A copy of the whole content.
    #[must_use]
    pub fn content(&self) -> Map<String, Value> {
        self.state().content().clone()
    }

    /// Edit the content in place, e.g. to change a nested value.
    ///
    /// `f` works on a copy that replaces the content when it returns, so the session is not
    /// locked while `f` runs. Calls on the same session from inside `f` see the content as it was
    /// before the update, and their writes are overwritten by the copy.
    pub fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut content = self.state().content_mut().clone();
        let result = f(&mut content);
        *self.state().content_mut() = content;
        result
    }

    /// Replace the whole content. Fails with [`Error::NotAnObject`] for anything but an object.
    pub fn replace(&self, value: Value) -> Result<()> {
        self.state().replace(value)
    }

    /// Clear the session, keeping only `keys_to_preserve`, and start a new validity window.
    pub fn reset(&self, keys_to_preserve: &[&str]) {
        let mut state = self.state();
        state.ensure_loaded(false);
        state.reset(keys_to_preserve);
    }

    pub fn destroy(&self) {
        self.reset(&[]);
    }

    /// Restart the session with a new validity window. An ephemeral session is written without
    /// a cookie expiry. Fails if `ephemeral` is requested while a max age is configured.
    pub fn set_duration(&self, duration: Duration, ephemeral: bool) -> Result<()> {
        self.state().set_duration(duration, ephemeral)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    /// Creation time of the session, once it has been loaded.
    #[must_use]
    pub fn created_at(&self) -> Option<OffsetDateTime> {
        let created_at = self.state().created_at()?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(created_at) * 1_000_000).ok()
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        let ms = self.state().duration();
        Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub fn expires(&self) -> Option<OffsetDateTime> {
        self.state().expires()
    }

    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.state().is_ephemeral()
    }

    pub fn finalize(&self) -> Result<Option<OutgoingCookie>> {
        self.state().finalize()
    }

    /// Finalize and hand the sealed cookie to `transport`. Returns whether a cookie was written.
    pub fn flush<T: CookieTransport + ?Sized>(&self, transport: &T) -> Result<bool> {
        match self.finalize()? {
            Some(cookie) => {
                transport.set(&cookie.name, cookie.value, &cookie.attributes);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Session").field(&*self.state()).finish()
    }
}

/// All sessions attached to the current request, keyed by their request key.
#[derive(Debug, Clone, Default)]
pub struct Sessions {
    by_key: HashMap<String, Session>,
}

impl Sessions {
    #[must_use]
    pub fn get(&self, request_key: &str) -> Option<&Session> {
        self.by_key.get(request_key)
    }

    #[must_use]
    pub fn contains(&self, request_key: &str) -> bool {
        self.by_key.contains_key(request_key)
    }

    pub(crate) fn insert(&mut self, request_key: String, session: Session) {
        self.by_key.insert(request_key, session);
    }
}
