use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform response envelope returned by every data-tool operation.
/// `success: false` is a per-call recoverable failure the caller surfaces;
/// it is never retried as if it were a transport fault.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub success: bool,
    pub data: Option<Value>,
    pub count: Option<u64>,
    pub error: Option<String>,
}

impl ToolEnvelope {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), count: None, error: None }
    }

    pub fn ok_with_count(data: Value, count: u64) -> Self {
        Self { success: true, data: Some(data), count: Some(count), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: None, count: None, error: Some(error.into()) }
    }
}

/// The e-commerce data store, consumed as an external collaborator. All
/// operations here are reads except `create_order`; the resolver only ever
/// retries the reads.
#[async_trait]
pub trait CommerceTools: Send + Sync {
    async fn search_products(&self, query: &str) -> Result<ToolEnvelope>;
    async fn get_products(&self, product_ids: &[String]) -> Result<ToolEnvelope>;
    async fn get_customers(&self, customer_ref: &str) -> Result<ToolEnvelope>;
    async fn get_customer_orders(&self, customer_id: &str) -> Result<ToolEnvelope>;
    async fn create_order(&self, payload: Value) -> Result<ToolEnvelope>;
    async fn get_categories(&self) -> Result<ToolEnvelope>;
}

#[cfg(test)]
mod tests {
    use super::ToolEnvelope;

    #[test]
    fn envelope_constructors_set_the_expected_shape() {
        let ok = ToolEnvelope::ok_with_count(serde_json::json!([{"id": "ord-1"}]), 1);
        assert!(ok.success);
        assert_eq!(ok.count, Some(1));
        assert!(ok.error.is_none());

        let failed = ToolEnvelope::failed("inventory service unavailable");
        assert!(!failed.success);
        assert!(failed.data.is_none());
        assert_eq!(failed.error.as_deref(), Some("inventory service unavailable"));
    }
}
