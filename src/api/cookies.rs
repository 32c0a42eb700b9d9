//! Session and CSRF cookies.
//!
//! Both cookies are built from a template whose name gets the tenant id
//! appended, so one browser can hold sessions for several tenants.

use crate::{Error, Result};
use axum::http::{header::COOKIE, HeaderMap, HeaderValue};
use std::{fmt, str::FromStr, time::Duration};
use tracing::warn;

/// Prefix browsers reserve for host-only, secure cookies.
pub const HOST_PREFIX: &str = "__Host-";
pub const STRICT_SESSION_PREFIX: &str = "__Host-Http-";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SameSite {
    None,
    Lax,
    #[default]
    Strict,
}

impl SameSite {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Lax => "Lax",
            Self::Strict => "Strict",
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SameSite {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lax" => Ok(Self::Lax),
            "strict" => Ok(Self::Strict),
            other => Err(format!(
                "invalid SameSite {other:?}, expected one of: None, Lax, Strict"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieTemplate {
    pub name: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl CookieTemplate {
    #[must_use]
    pub fn session() -> Self {
        Self {
            name: format!("{STRICT_SESSION_PREFIX}session"),
            path: "/".to_string(),
            domain: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Strict,
        }
    }

    /// Readable by scripts so the page can echo it in `x-csrf-token`.
    #[must_use]
    pub fn csrf() -> Self {
        Self {
            name: format!("{HOST_PREFIX}csrf"),
            path: "/".to_string(),
            domain: None,
            secure: true,
            http_only: false,
            same_site: SameSite::Strict,
        }
    }

    #[must_use]
    pub fn name_for(&self, tenant_id: &str) -> String {
        format!("{}-{tenant_id}", self.name)
    }

    fn render(&self, tenant_id: &str, value: &str, max_age: u64) -> Result<HeaderValue> {
        let mut cookie = format!(
            "{}={value}; Path={}; Max-Age={max_age}; SameSite={}",
            self.name_for(tenant_id),
            self.path,
            self.same_site
        );
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        HeaderValue::from_str(&cookie)
            .map_err(|err| Error::server("failed to build cookie", err))
    }

    /// `Set-Cookie` value carrying `value` for `max_age`.
    ///
    /// # Errors
    /// Returns an error if the value is not a valid header.
    pub fn set(&self, tenant_id: &str, value: &str, max_age: Duration) -> Result<HeaderValue> {
        self.render(tenant_id, value, max_age.as_secs())
    }

    /// `Set-Cookie` value that removes the cookie.
    ///
    /// # Errors
    /// Returns an error if the template does not form a valid header.
    pub fn clear(&self, tenant_id: &str) -> Result<HeaderValue> {
        self.render(tenant_id, "", 0)
    }

    /// Weaknesses of a template used for the session cookie.
    #[must_use]
    pub fn session_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.secure {
            warnings.push("session cookie is not Secure".to_string());
        }
        if !self.http_only {
            warnings.push("session cookie is not HttpOnly".to_string());
        }
        if self.same_site != SameSite::Strict {
            warnings.push(format!("session cookie uses SameSite={}", self.same_site));
        }
        if !self.name.starts_with(STRICT_SESSION_PREFIX) {
            warnings.push(format!(
                "session cookie name {:?} lacks the {STRICT_SESSION_PREFIX} prefix",
                self.name
            ));
        }
        warnings
    }

    /// Weaknesses of a template used for the CSRF cookie.
    #[must_use]
    pub fn csrf_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.http_only {
            warnings.push("csrf cookie is HttpOnly and cannot be read by the page".to_string());
        }
        if !self.secure {
            warnings.push("csrf cookie is not Secure".to_string());
        }
        warnings
    }
}

/// Cookie settings of the HTTP surface.
#[derive(Clone, Debug)]
pub struct CookieConfig {
    pub session: CookieTemplate,
    pub csrf: CookieTemplate,
    pub max_age: Duration,
}

impl CookieConfig {
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            session: CookieTemplate::session(),
            csrf: CookieTemplate::csrf(),
            max_age,
        }
    }

    /// Log every template weakness once at startup.
    pub fn log_warnings(&self) {
        for warning in self
            .session
            .session_warnings()
            .into_iter()
            .chain(self.csrf.csrf_warnings())
        {
            warn!("Cookie configuration: {warning}");
        }
    }
}

/// Value of cookie `name` from the request `Cookie` headers.
#[must_use]
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_warnings() {
        assert!(CookieTemplate::session().session_warnings().is_empty());
        assert!(CookieTemplate::csrf().csrf_warnings().is_empty());
    }

    #[test]
    fn weak_templates_are_reported() {
        let session = CookieTemplate {
            name: "sid".to_string(),
            secure: false,
            http_only: false,
            same_site: SameSite::Lax,
            ..CookieTemplate::session()
        };
        assert_eq!(session.session_warnings().len(), 4);

        let csrf = CookieTemplate {
            http_only: true,
            ..CookieTemplate::csrf()
        };
        assert_eq!(csrf.csrf_warnings().len(), 1);
    }

    #[test]
    fn set_cookie_carries_tenant_suffix_and_attributes() {
        let value = CookieTemplate::session()
            .set("acme", "abc", Duration::from_secs(60))
            .expect("cookie");
        assert_eq!(
            value.to_str().expect("ascii"),
            "__Host-Http-session-acme=abc; Path=/; Max-Age=60; SameSite=Strict; Secure; HttpOnly"
        );

        let cleared = CookieTemplate::csrf().clear("acme").expect("cookie");
        assert_eq!(
            cleared.to_str().expect("ascii"),
            "__Host-csrf-acme=; Path=/; Max-Age=0; SameSite=Strict; Secure"
        );
    }

    #[test]
    fn read_finds_cookie_by_name() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("a=1; __Host-Http-session-acme=sid; b=2"),
        );
        headers.append(COOKIE, HeaderValue::from_static("c=3"));
        assert_eq!(
            read(&headers, "__Host-Http-session-acme").as_deref(),
            Some("sid")
        );
        assert_eq!(read(&headers, "c").as_deref(), Some("3"));
        assert_eq!(read(&headers, "missing"), None);
    }

    #[test]
    fn same_site_parses_case_insensitively() {
        assert_eq!("lax".parse::<SameSite>(), Ok(SameSite::Lax));
        assert_eq!("Strict".parse::<SameSite>(), Ok(SameSite::Strict));
        assert!("whatever".parse::<SameSite>().is_err());
    }
}
