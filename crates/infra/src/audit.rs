//! Audit sinks.
//!
//! Every sink is fire-and-forget: failures are logged and swallowed, and no
//! caller ever waits on a write.

use std::sync::{Arc, Mutex};

use sqlx::PgPool;

use workforce_auth::{AuditEvent, AuditSink};

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            actor_id = %event.actor_id,
            action = %event.action,
            target_id = event.target_id.as_deref().unwrap_or(""),
            payload = %event.payload,
            occurred_at = %event.occurred_at,
            "audit event"
        );
    }
}

/// Keeps events in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Inserts into `audit_log` on a spawned task.
///
/// Needs a Tokio runtime on the calling thread; without one the event is
/// logged and dropped.
#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: Arc<PgPool>,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

impl AuditSink for PostgresAuditSink {
    fn record(&self, event: AuditEvent) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                tracing::warn!(action = %event.action, "no runtime; audit event dropped");
                return;
            }
        };

        let pool = self.pool.clone();
        handle.spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_log (actor_id, action, target_id, payload, occurred_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(event.actor_id.as_uuid())
            .bind(&event.action)
            .bind(&event.target_id)
            .bind(&event.payload)
            .bind(event.occurred_at)
            .execute(&*pool)
            .await;

            if let Err(e) = result {
                tracing::error!(action = %event.action, error = %e, "failed to write audit event");
            }
        });
    }
}

/// Fans one event out to several sinks.
#[derive(Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use workforce_core::UserId;

    use super::*;

    #[test]
    fn in_memory_sink_keeps_order() {
        let sink = InMemoryAuditSink::new();
        let actor = UserId::new();
        sink.record(AuditEvent::new(actor, "role.created"));
        sink.record(AuditEvent::new(actor, "role.deleted").payload(json!({ "n": 1 })));
        assert_eq!(sink.actions(), vec!["role.created", "role.deleted"]);
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(InMemoryAuditSink::new());
        let b = Arc::new(InMemoryAuditSink::new());
        let fanout = FanoutAuditSink::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(TracingAuditSink));

        fanout.record(AuditEvent::new(UserId::new(), "user.role_assigned").target("x"));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events()[0].target_id.as_deref(), Some("x"));
    }
}
