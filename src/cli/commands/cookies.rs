use crate::api::cookies::{CookieConfig, CookieTemplate, SameSite};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_SESSION_COOKIE_NAME: &str = "session-cookie-name";
pub const ARG_SESSION_COOKIE_PATH: &str = "session-cookie-path";
pub const ARG_SESSION_COOKIE_DOMAIN: &str = "session-cookie-domain";
pub const ARG_SESSION_COOKIE_SECURE: &str = "session-cookie-secure";
pub const ARG_SESSION_COOKIE_HTTP_ONLY: &str = "session-cookie-http-only";
pub const ARG_SESSION_COOKIE_SAME_SITE: &str = "session-cookie-same-site";

pub const ARG_CSRF_COOKIE_NAME: &str = "csrf-cookie-name";
pub const ARG_CSRF_COOKIE_PATH: &str = "csrf-cookie-path";
pub const ARG_CSRF_COOKIE_DOMAIN: &str = "csrf-cookie-domain";
pub const ARG_CSRF_COOKIE_SECURE: &str = "csrf-cookie-secure";
pub const ARG_CSRF_COOKIE_HTTP_ONLY: &str = "csrf-cookie-http-only";
pub const ARG_CSRF_COOKIE_SAME_SITE: &str = "csrf-cookie-same-site";

/// Arg ids of one cookie template, in template field order.
struct TemplateArgs {
    name: &'static str,
    path: &'static str,
    domain: &'static str,
    secure: &'static str,
    http_only: &'static str,
    same_site: &'static str,
}

const SESSION: TemplateArgs = TemplateArgs {
    name: ARG_SESSION_COOKIE_NAME,
    path: ARG_SESSION_COOKIE_PATH,
    domain: ARG_SESSION_COOKIE_DOMAIN,
    secure: ARG_SESSION_COOKIE_SECURE,
    http_only: ARG_SESSION_COOKIE_HTTP_ONLY,
    same_site: ARG_SESSION_COOKIE_SAME_SITE,
};

const CSRF: TemplateArgs = TemplateArgs {
    name: ARG_CSRF_COOKIE_NAME,
    path: ARG_CSRF_COOKIE_PATH,
    domain: ARG_CSRF_COOKIE_DOMAIN,
    secure: ARG_CSRF_COOKIE_SECURE,
    http_only: ARG_CSRF_COOKIE_HTTP_ONLY,
    same_site: ARG_CSRF_COOKIE_SAME_SITE,
};

impl TemplateArgs {
    fn parse(&self, matches: &ArgMatches, defaults: CookieTemplate) -> CookieTemplate {
        let string = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let flag = |id: &str, default: bool| matches.get_one::<bool>(id).copied().unwrap_or(default);

        CookieTemplate {
            name: string(self.name).unwrap_or(defaults.name),
            path: string(self.path).unwrap_or(defaults.path),
            domain: string(self.domain),
            secure: flag(self.secure, defaults.secure),
            http_only: flag(self.http_only, defaults.http_only),
            same_site: matches
                .get_one::<SameSite>(self.same_site)
                .copied()
                .unwrap_or(defaults.same_site),
        }
    }
}

/// Cookie templates from matches; `max_age` is the session duration.
#[must_use]
pub fn parse(matches: &ArgMatches, max_age: Duration) -> CookieConfig {
    CookieConfig {
        session: SESSION.parse(matches, CookieTemplate::session()),
        csrf: CSRF.parse(matches, CookieTemplate::csrf()),
        max_age,
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_COOKIE_NAME)
                .long(ARG_SESSION_COOKIE_NAME)
                .help("Session cookie name, suffixed with -<tenant_id>")
                .env("SESSIOND_SESSION_COOKIE_NAME")
                .default_value("__Host-Http-session"),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_PATH)
                .long(ARG_SESSION_COOKIE_PATH)
                .help("Session cookie Path attribute")
                .env("SESSIOND_SESSION_COOKIE_PATH")
                .default_value("/"),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_DOMAIN)
                .long(ARG_SESSION_COOKIE_DOMAIN)
                .help("Session cookie Domain attribute (omitted when unset)")
                .env("SESSIOND_SESSION_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_SECURE)
                .long(ARG_SESSION_COOKIE_SECURE)
                .help("Session cookie Secure attribute")
                .env("SESSIOND_SESSION_COOKIE_SECURE")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_HTTP_ONLY)
                .long(ARG_SESSION_COOKIE_HTTP_ONLY)
                .help("Session cookie HttpOnly attribute")
                .env("SESSIOND_SESSION_COOKIE_HTTP_ONLY")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_SAME_SITE)
                .long(ARG_SESSION_COOKIE_SAME_SITE)
                .help("Session cookie SameSite attribute: None, Lax, Strict")
                .env("SESSIOND_SESSION_COOKIE_SAME_SITE")
                .default_value("Strict")
                .value_parser(clap::value_parser!(SameSite)),
        )
        .arg(
            Arg::new(ARG_CSRF_COOKIE_NAME)
                .long(ARG_CSRF_COOKIE_NAME)
                .help("CSRF cookie name, suffixed with -<tenant_id>")
                .env("SESSIOND_CSRF_COOKIE_NAME")
                .default_value("__Host-csrf"),
        )
        .arg(
            Arg::new(ARG_CSRF_COOKIE_PATH)
                .long(ARG_CSRF_COOKIE_PATH)
                .help("CSRF cookie Path attribute")
                .env("SESSIOND_CSRF_COOKIE_PATH")
                .default_value("/"),
        )
        .arg(
            Arg::new(ARG_CSRF_COOKIE_DOMAIN)
                .long(ARG_CSRF_COOKIE_DOMAIN)
                .help("CSRF cookie Domain attribute (omitted when unset)")
                .env("SESSIOND_CSRF_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_CSRF_COOKIE_SECURE)
                .long(ARG_CSRF_COOKIE_SECURE)
                .help("CSRF cookie Secure attribute")
                .env("SESSIOND_CSRF_COOKIE_SECURE")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_CSRF_COOKIE_HTTP_ONLY)
                .long(ARG_CSRF_COOKIE_HTTP_ONLY)
                .help("CSRF cookie HttpOnly attribute; scripts must read this cookie")
                .env("SESSIOND_CSRF_COOKIE_HTTP_ONLY")
                .default_value("false")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_CSRF_COOKIE_SAME_SITE)
                .long(ARG_CSRF_COOKIE_SAME_SITE)
                .help("CSRF cookie SameSite attribute: None, Lax, Strict")
                .env("SESSIOND_CSRF_COOKIE_SAME_SITE")
                .default_value("Strict")
                .value_parser(clap::value_parser!(SameSite)),
        )
}
