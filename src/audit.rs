//! Audit events emitted by the session manager.
//!
//! Delivery is pluggable through [`AuditSink`]; the default sink writes
//! structured `tracing` events under the `audit` target so an external
//! collector can pick them up.

use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditEvent {
    AuthInitiated {
        tenant_id: String,
    },
    AuthSuccess {
        tenant_id: String,
        session_id: String,
        subject: String,
    },
    AuthFailure {
        tenant_id: String,
        reason: String,
    },
    Logout {
        tenant_id: String,
        session_id: String,
    },
    SessionEvicted {
        tenant_id: String,
        session_id: String,
    },
}

impl AuditEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AuthInitiated { .. } => "auth_initiated",
            Self::AuthSuccess { .. } => "auth_success",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Logout { .. } => "logout",
            Self::SessionEvicted { .. } => "session_evicted",
        }
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        match self {
            Self::AuthInitiated { tenant_id }
            | Self::AuthSuccess { tenant_id, .. }
            | Self::AuthFailure { tenant_id, .. }
            | Self::Logout { tenant_id, .. }
            | Self::SessionEvicted { tenant_id, .. } => tenant_id,
        }
    }
}

/// Audit delivery abstraction. Implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let name = event.name();
        match &event {
            AuditEvent::AuthInitiated { tenant_id } => {
                info!(target: "audit", event = name, tenant_id = %tenant_id, "audit");
            }
            AuditEvent::AuthSuccess {
                tenant_id,
                session_id,
                subject,
            } => {
                info!(
                    target: "audit",
                    event = name,
                    tenant_id = %tenant_id,
                    session_id = %redact(session_id),
                    subject = %subject,
                    "audit"
                );
            }
            AuditEvent::AuthFailure { tenant_id, reason } => {
                info!(target: "audit", event = name, tenant_id = %tenant_id, reason = %reason, "audit");
            }
            AuditEvent::Logout {
                tenant_id,
                session_id,
            }
            | AuditEvent::SessionEvicted {
                tenant_id,
                session_id,
            } => {
                info!(
                    target: "audit",
                    event = name,
                    tenant_id = %tenant_id,
                    session_id = %redact(session_id),
                    "audit"
                );
            }
        }
    }
}

/// Keeps events in memory; used by tests to assert on the audit trail.
#[derive(Clone, Debug, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(AuditEvent::name).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Session ids are bearer credentials; only a prefix goes to the logs.
#[must_use]
pub fn redact(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(6).collect();
    format!("{prefix}…")
}
