use std::time::Duration;

pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(86_400);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1_800);

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Lifetime of a session and of a pending authorization state.
    pub session_duration: Duration,
    /// Sliding idle window kept by the `active` marker.
    pub idle_timeout: Duration,
    /// Where logout lands when the provider has no end-session endpoint.
    pub post_logout_redirect_url: String,
    /// Treat a fingerprint drift in `validate` as invalid instead of a warning.
    pub enforce_fingerprint: bool,
    /// Treat an inactive introspection result as invalid instead of a warning.
    pub enforce_introspection: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_duration: DEFAULT_SESSION_DURATION,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            post_logout_redirect_url: String::new(),
            enforce_fingerprint: false,
            enforce_introspection: false,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration;
        self
    }

    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_post_logout_redirect_url(mut self, url: impl Into<String>) -> Self {
        self.post_logout_redirect_url = url.into();
        self
    }

    #[must_use]
    pub const fn with_enforce_fingerprint(mut self, enforce: bool) -> Self {
        self.enforce_fingerprint = enforce;
        self
    }

    #[must_use]
    pub const fn with_enforce_introspection(mut self, enforce: bool) -> Self {
        self.enforce_introspection = enforce;
        self
    }
}

/// `std` to `chrono` conversion, saturating at the chrono maximum.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
