use crate::oidc::ClientAuth;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_CLIENT_ID: &str = "client-id";
pub const ARG_REDIRECT_URI: &str = "redirect-uri";
pub const ARG_CLIENT_AUTH: &str = "client-auth";
pub const ARG_MTLS_CERT_PATH: &str = "mtls-cert-path";
pub const ARG_MTLS_KEY_PATH: &str = "mtls-key-path";
pub const ARG_HTTP_TIMEOUT_SECONDS: &str = "http-timeout-seconds";
pub const ARG_DISCOVERY_TIMEOUT_MS: &str = "discovery-timeout-ms";

#[derive(Debug, Clone)]
pub struct Options {
    pub client_id: String,
    pub redirect_uri: String,
    pub client_auth: ClientAuth,
    pub mtls_cert_path: Option<String>,
    pub mtls_key_path: Option<String>,
    pub http_timeout: Duration,
    pub discovery_timeout: Duration,
}

impl Options {
    /// Parse identity provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or mutual TLS is
    /// selected without a certificate and key.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let read_optional = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let client_auth = matches
            .get_one::<ClientAuth>(ARG_CLIENT_AUTH)
            .copied()
            .unwrap_or_default();
        let mtls_cert_path = read_optional(ARG_MTLS_CERT_PATH);
        let mtls_key_path = read_optional(ARG_MTLS_KEY_PATH);
        if client_auth == ClientAuth::Mtls && (mtls_cert_path.is_none() || mtls_key_path.is_none())
        {
            anyhow::bail!(
                "--{ARG_CLIENT_AUTH} mtls requires --{ARG_MTLS_CERT_PATH} and --{ARG_MTLS_KEY_PATH}"
            );
        }

        Ok(Self {
            client_id: read_required(ARG_CLIENT_ID)?,
            redirect_uri: read_required(ARG_REDIRECT_URI)?,
            client_auth,
            mtls_cert_path,
            mtls_key_path,
            http_timeout: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_HTTP_TIMEOUT_SECONDS)
                    .copied()
                    .unwrap_or(10),
            ),
            discovery_timeout: Duration::from_millis(
                matches
                    .get_one::<u64>(ARG_DISCOVERY_TIMEOUT_MS)
                    .copied()
                    .unwrap_or(900),
            ),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("OAuth client id, overridable per tenant with the client_id mapping property")
                .env("SESSIOND_CLIENT_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_REDIRECT_URI)
                .long(ARG_REDIRECT_URI)
                .help("Absolute URL of the /callback endpoint")
                .env("SESSIOND_REDIRECT_URI")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CLIENT_AUTH)
                .long(ARG_CLIENT_AUTH)
                .help("Client authentication at the token endpoint: mtls, client_secret, insecure")
                .env("SESSIOND_CLIENT_AUTH")
                .default_value("mtls")
                .value_parser(clap::value_parser!(ClientAuth)),
        )
        .arg(
            Arg::new(ARG_MTLS_CERT_PATH)
                .long(ARG_MTLS_CERT_PATH)
                .help("Path to the mutual TLS client certificate (PEM)")
                .env("SESSIOND_MTLS_CERT_PATH"),
        )
        .arg(
            Arg::new(ARG_MTLS_KEY_PATH)
                .long(ARG_MTLS_KEY_PATH)
                .help("Path to the mutual TLS client key (PKCS#8 PEM)")
                .env("SESSIOND_MTLS_KEY_PATH"),
        )
        .arg(
            Arg::new(ARG_HTTP_TIMEOUT_SECONDS)
                .long(ARG_HTTP_TIMEOUT_SECONDS)
                .help("Timeout for token, refresh and introspection requests")
                .env("SESSIOND_HTTP_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DISCOVERY_TIMEOUT_MS)
                .long(ARG_DISCOVERY_TIMEOUT_MS)
                .help("Timeout for discovery and JWKS requests in milliseconds")
                .env("SESSIOND_DISCOVERY_TIMEOUT_MS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
}
