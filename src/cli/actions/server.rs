use crate::{
    api::{self, cookies::CookieConfig},
    audit::TracingAuditSink,
    cli::{
        commands::{oidc, session, store, store::MEMORY_DSN},
        telemetry,
    },
    clock::{Clock, SystemClock},
    csrf::CsrfBinder,
    grpc,
    housekeeper::{Housekeeper, HousekeeperConfig},
    oidc::{build_http_client, load_identity, ClientAuth, OidcClient, OidcConfig},
    session::SessionManager,
    store::{KeySpace, KvStore, MemoryKvStore, RedisKvStore, SessionStore},
    trust::{MemoryTrustRepository, PgTrustRepository, TrustRegistry, TrustRepository},
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub grpc_port: u16,
    pub store: store::Options,
    pub oidc: oidc::Options,
    pub session: session::Options,
    pub cookies: CookieConfig,
    pub housekeeper: HousekeeperConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a backend cannot be reached, the configuration is
/// inconsistent, or a listener fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let trust = TrustRegistry::new(trust_repository(&args.store.dsn).await?);
    let store = SessionStore::new(
        kv_store(&args.store, clock.clone()).await?,
        KeySpace::new(args.store.kv_prefix.clone()),
        clock.clone(),
    );

    let identity = match args.oidc.client_auth {
        ClientAuth::Mtls => {
            let cert = args.oidc.mtls_cert_path.as_deref().unwrap_or_default();
            let key = args.oidc.mtls_key_path.as_deref().unwrap_or_default();
            Some(load_identity(cert, key)?)
        }
        ClientAuth::ClientSecret | ClientAuth::Insecure => None,
    };
    if args.oidc.client_auth == ClientAuth::Insecure {
        warn!("Token endpoint requests are sent without client authentication");
    }
    let http = build_http_client(args.oidc.http_timeout, identity)?;
    let oidc = OidcClient::new(
        http,
        OidcConfig::new(args.oidc.client_id.clone(), args.oidc.redirect_uri.clone())
            .with_client_auth(args.oidc.client_auth)
            .with_discovery_timeout(args.oidc.discovery_timeout),
    );

    let csrf = CsrfBinder::new(args.session.csrf_secret.expose_secret().as_bytes())
        .context("invalid --csrf-secret")?;

    args.cookies.log_warnings();

    let manager = SessionManager::new(
        trust,
        store,
        oidc,
        csrf,
        Arc::new(TracingAuditSink),
        clock.clone(),
        args.session.config.clone(),
    );

    let cancel = CancellationToken::new();
    shutdown_on_signal(cancel.clone());

    let housekeeper =
        Housekeeper::new(manager.clone(), clock, args.housekeeper).spawn(cancel.clone());

    let router = api::router(manager.clone(), Arc::new(args.cookies));
    let result = tokio::try_join!(
        async {
            let result = api::serve(args.port, router, cancel.clone()).await;
            cancel.cancel();
            result
        },
        async {
            let result = grpc::serve(args.grpc_port, manager, cancel.clone()).await;
            cancel.cancel();
            result
        },
    );
    cancel.cancel();

    if let Err(err) = housekeeper.await {
        error!("Housekeeper task failed: {err}");
    }
    telemetry::shutdown_tracer();

    result.map(|_| ())
}

async fn trust_repository(dsn: &str) -> Result<Arc<dyn TrustRepository>> {
    if dsn == MEMORY_DSN {
        warn!("Using the in-memory trust registry; mappings are lost on restart");
        return Ok(Arc::new(MemoryTrustRepository::default()));
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    Ok(Arc::new(PgTrustRepository::new(pool)))
}

async fn kv_store(options: &store::Options, clock: Arc<dyn Clock>) -> Result<Arc<dyn KvStore>> {
    if options.kv_dsn == MEMORY_DSN {
        warn!("Using the in-memory session store; sessions are lost on restart");
        return Ok(Arc::new(MemoryKvStore::new(clock)));
    }
    Ok(Arc::new(
        RedisKvStore::connect(&options.kv_dsn, options.kv_timeout).await?,
    ))
}

fn shutdown_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Failed to listen for shutdown signal: {err}"),
        }
        cancel.cancel();
    });
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("http", format!("tcp:{}", args.port)),
        ("grpc", format!("tcp:{}", args.grpc_port)),
        ("dsn", redact_dsn(&args.store.dsn)),
        ("kv_dsn", redact_dsn(&args.store.kv_dsn)),
        ("kv_prefix", args.store.kv_prefix.clone()),
        ("client_id", args.oidc.client_id.clone()),
        ("redirect_uri", args.oidc.redirect_uri.clone()),
        ("client_auth", args.oidc.client_auth.to_string()),
        (
            "session_duration",
            format!("{}s", args.session.config.session_duration.as_secs()),
        ),
        (
            "idle_timeout",
            format!("{}s", args.session.config.idle_timeout.as_secs()),
        ),
        (
            "enforce_fingerprint",
            args.session.config.enforce_fingerprint.to_string(),
        ),
        (
            "enforce_introspection",
            args.session.config.enforce_introspection.to_string(),
        ),
        (
            "housekeeper_workers",
            args.housekeeper.concurrency_limit.to_string(),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    if dsn == MEMORY_DSN {
        return dsn.to_string();
    }
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
