use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Mutable per-session facts: customer identity, channel, whatever the
/// surrounding application wants strategies to see as `situation.*`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionContext {
    pub entries: BTreeMap<String, Value>,
}

impl SessionContext {
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.entries.get("customer_id").and_then(Value::as_str)
    }
}

/// Get-or-create store of session contexts. Each session carries its own
/// async mutex, so concurrent requests within one session serialize while
/// requests in different sessions never contend.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<SessionContext>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, session_id: &str) -> Arc<tokio::sync::Mutex<SessionContext>> {
        let mut sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(sessions.entry(session_id.to_string()).or_default())
    }

    pub fn len(&self) -> usize {
        match self.sessions.lock() {
            Ok(sessions) => sessions.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::session::SessionRegistry;

    #[tokio::test]
    async fn same_session_id_returns_the_same_context() {
        let registry = SessionRegistry::new();
        {
            let handle = registry.session("sess-1");
            handle.lock().await.set("customer_id", serde_json::json!("cust-1"));
        }

        let handle = registry.session("sess-1");
        let context = handle.lock().await;
        assert_eq!(context.customer_id(), Some("cust-1"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn writes_within_a_session_are_serialized() {
        let registry = Arc::new(SessionRegistry::new());
        let mut handles = Vec::new();

        for index in 0..8u32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let session = registry.session("sess-shared");
                let mut context = session.lock().await;
                // Read-modify-write across an await point; the per-session
                // lock keeps it atomic.
                let current = context
                    .entries
                    .get("counter")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(1)).await;
                context.set("counter", serde_json::json!(current + 1));
                let _ = index;
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        let session = registry.session("sess-shared");
        let context = session.lock().await;
        assert_eq!(context.entries.get("counter"), Some(&serde_json::json!(8)));
    }

    #[tokio::test]
    async fn distinct_sessions_do_not_share_state() {
        let registry = SessionRegistry::new();
        registry.session("sess-a").lock().await.set("customer_id", serde_json::json!("cust-a"));
        registry.session("sess-b").lock().await.set("customer_id", serde_json::json!("cust-b"));

        assert_eq!(
            registry.session("sess-a").lock().await.customer_id(),
            Some("cust-a")
        );
        assert_eq!(
            registry.session("sess-b").lock().await.customer_id(),
            Some("cust-b")
        );
        assert_eq!(registry.len(), 2);
    }
}
