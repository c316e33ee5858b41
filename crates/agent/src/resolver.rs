use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use concierge_core::config::ResolverConfig;
use concierge_core::domain::commerce::{CustomerData, OrderData};
use concierge_core::domain::context::{ResolutionStatus, ResolvedContext};
use concierge_core::errors::{PipelineError, PipelineStage, ResolutionError};
use concierge_core::Intent;

use crate::tools::{CommerceTools, ToolEnvelope};

/// The reference kinds the resolver knows how to ground.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ReferenceKind {
    LastOrder,
    OrderById(String),
    Customer,
    Unknown,
}

fn reference_kind(raw: &str) -> ReferenceKind {
    let normalized = raw.trim().to_ascii_lowercase();
    if let Some(id) =
        normalized.strip_prefix("order_id:").or_else(|| normalized.strip_prefix("order:"))
    {
        return ReferenceKind::OrderById(id.trim().to_string());
    }
    if normalized.contains("last order")
        || normalized.contains("recent order")
        || normalized == "last_order"
    {
        return ReferenceKind::LastOrder;
    }
    if normalized.contains("account") || normalized.contains("customer") {
        return ReferenceKind::Customer;
    }
    ReferenceKind::Unknown
}

enum Lookup<'a> {
    Customers(&'a str),
    Orders(&'a str),
}

enum LookupFailure {
    TimedOut,
    Transport(String),
}

/// Grounds an intent's unresolved references against live commerce data.
///
/// Every lookup is an idempotent read: transport faults retry with bounded
/// exponential backoff, while a `success: false` envelope is surfaced as a
/// typed resolution error without another attempt. A reference resolves
/// only when the lookup yields exactly one unambiguous candidate; the
/// resolver never substitutes a default for a required reference.
pub struct ContextResolver<T> {
    tools: T,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
}

impl<T> ContextResolver<T>
where
    T: CommerceTools,
{
    pub fn new(tools: T, config: &ResolverConfig) -> Self {
        Self {
            tools,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    pub async fn resolve(
        &self,
        user_query: &str,
        intent: &Intent,
        session_context: &BTreeMap<String, Value>,
    ) -> Result<ResolvedContext, PipelineError> {
        let captured_at = Utc::now();
        let mut errors: Vec<ResolutionError> = Vec::new();
        let mut any_unresolved = false;
        let mut required_unresolved = false;

        let session_customer = session_context.get("customer_id").and_then(Value::as_str);
        let wants_order = intent
            .unresolved_refs
            .iter()
            .any(|reference| order_kind(&reference_kind(reference)));
        let needs_customer = intent.requires_customer() || intent.requires_order() || wants_order;

        // Ground the customer first; order references hang off it.
        let mut customer_error: Option<ResolutionError> = None;
        let customer_data: Option<CustomerData> = if needs_customer {
            match session_customer {
                None => {
                    customer_error = Some(ResolutionError::CustomerNotFound {
                        reference: "customer".to_string(),
                    });
                    None
                }
                Some(reference) => match self.ground_customer(reference).await? {
                    Ok(customer) => Some(customer),
                    Err(error) => {
                        customer_error = Some(error);
                        None
                    }
                },
            }
        } else {
            None
        };

        let mut order_data: Option<OrderData> = None;
        let mut customer_error_attached = false;

        for reference in &intent.unresolved_refs {
            let kind = reference_kind(reference);
            let required = match kind {
                ReferenceKind::LastOrder | ReferenceKind::OrderById(_) => intent.requires_order(),
                ReferenceKind::Customer => intent.requires_customer(),
                ReferenceKind::Unknown => false,
            };

            let resolved = match &kind {
                ReferenceKind::Customer => {
                    if customer_data.is_none() {
                        if let Some(error) = customer_error.clone() {
                            errors.push(error);
                            customer_error_attached = true;
                        }
                    }
                    customer_data.is_some()
                }
                ReferenceKind::LastOrder | ReferenceKind::OrderById(_) => {
                    match &customer_data {
                        None => {
                            let error = customer_error.clone().unwrap_or_else(|| {
                                ResolutionError::CustomerNotFound {
                                    reference: reference.clone(),
                                }
                            });
                            errors.push(error);
                            customer_error_attached = true;
                            false
                        }
                        Some(customer) => {
                            match self
                                .ground_order(reference, &kind, &customer.id, captured_at)
                                .await?
                            {
                                Ok(order) => {
                                    order_data = Some(order);
                                    true
                                }
                                Err(error) => {
                                    errors.push(error);
                                    false
                                }
                            }
                        }
                    }
                }
                ReferenceKind::Unknown => {
                    errors.push(ResolutionError::UnknownReference {
                        reference: reference.clone(),
                    });
                    false
                }
            };

            if !resolved {
                any_unresolved = true;
                if required {
                    required_unresolved = true;
                }
            }
        }

        // A customer grounding failure matters even when no reference named
        // the customer explicitly.
        if needs_customer && customer_data.is_none() && !customer_error_attached {
            if let Some(error) = customer_error {
                errors.push(error);
                any_unresolved = true;
                if intent.requires_customer() || intent.requires_order() {
                    required_unresolved = true;
                }
            }
        }

        let resolution_status = if required_unresolved {
            ResolutionStatus::Failed
        } else if any_unresolved || !errors.is_empty() {
            ResolutionStatus::Partial
        } else {
            ResolutionStatus::Resolved
        };

        debug!(
            event_name = "resolver.context_built",
            status = ?resolution_status,
            error_count = errors.len(),
            order_grounded = order_data.is_some(),
            "context resolution finished"
        );

        Ok(ResolvedContext {
            user_query: user_query.to_string(),
            order_data,
            customer_data,
            current_situation: situation_from(session_context),
            requested_changes: requested_changes_from(intent),
            resolution_status,
            resolution_errors: errors,
            captured_at,
        })
    }

    async fn ground_customer(
        &self,
        reference: &str,
    ) -> Result<Result<CustomerData, ResolutionError>, PipelineError> {
        let envelope = match self.lookup_with_retry(Lookup::Customers(reference)).await {
            Ok(envelope) => envelope,
            Err(failure) => return self.lookup_failure(reference, failure).map(Err),
        };
        if !envelope.success {
            return Ok(Err(ResolutionError::LookupFailed {
                reference: reference.to_string(),
                message: envelope.error.unwrap_or_else(|| "tool reported failure".to_string()),
            }));
        }

        let candidates = candidates_from(&envelope);
        match candidates.len() {
            0 => Ok(Err(ResolutionError::CustomerNotFound { reference: reference.to_string() })),
            1 => match customer_from_value(&candidates[0]) {
                Some(customer) => Ok(Ok(customer)),
                None => Ok(Err(ResolutionError::LookupFailed {
                    reference: reference.to_string(),
                    message: "customer record could not be decoded".to_string(),
                })),
            },
            many => Ok(Err(ResolutionError::AmbiguousReference {
                reference: reference.to_string(),
                candidates: many,
            })),
        }
    }

    async fn ground_order(
        &self,
        reference: &str,
        kind: &ReferenceKind,
        customer_id: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<Result<OrderData, ResolutionError>, PipelineError> {
        let envelope = match self.lookup_with_retry(Lookup::Orders(customer_id)).await {
            Ok(envelope) => envelope,
            Err(failure) => return self.lookup_failure(reference, failure).map(Err),
        };
        if !envelope.success {
            return Ok(Err(ResolutionError::LookupFailed {
                reference: reference.to_string(),
                message: envelope.error.unwrap_or_else(|| "tool reported failure".to_string()),
            }));
        }

        let candidates = candidates_from(&envelope);
        if candidates.is_empty() {
            return Ok(Err(ResolutionError::NoOrdersFound { reference: reference.to_string() }));
        }

        let mut orders: Vec<OrderData> = candidates
            .iter()
            .filter_map(|candidate| order_from_value(candidate, captured_at))
            .collect();
        if orders.is_empty() {
            return Ok(Err(ResolutionError::LookupFailed {
                reference: reference.to_string(),
                message: "order records could not be decoded".to_string(),
            }));
        }

        match kind {
            ReferenceKind::LastOrder => {
                orders.sort_by_key(|order| order.created_at);
                let newest = orders[orders.len() - 1].clone();
                let ties =
                    orders.iter().filter(|order| order.created_at == newest.created_at).count();
                if ties > 1 {
                    Ok(Err(ResolutionError::AmbiguousReference {
                        reference: reference.to_string(),
                        candidates: ties,
                    }))
                } else {
                    Ok(Ok(newest))
                }
            }
            ReferenceKind::OrderById(target) => {
                let mut matching: Vec<OrderData> =
                    orders.into_iter().filter(|order| order.id == *target).collect();
                match matching.len() {
                    0 => Ok(Err(ResolutionError::NoOrdersFound {
                        reference: reference.to_string(),
                    })),
                    1 => Ok(Ok(matching.remove(0))),
                    many => Ok(Err(ResolutionError::AmbiguousReference {
                        reference: reference.to_string(),
                        candidates: many,
                    })),
                }
            }
            ReferenceKind::Customer | ReferenceKind::Unknown => {
                Ok(Err(ResolutionError::UnknownReference { reference: reference.to_string() }))
            }
        }
    }

    /// One tool call with bounded backoff on transport faults. A timeout
    /// aborts the whole stage; an envelope is returned as-is.
    async fn lookup_with_retry(&self, lookup: Lookup<'_>) -> Result<ToolEnvelope, LookupFailure> {
        let mut attempt: u32 = 0;
        loop {
            match tokio::time::timeout(self.timeout, self.call_tool(&lookup)).await {
                Err(_) => return Err(LookupFailure::TimedOut),
                Ok(Ok(envelope)) => return Ok(envelope),
                Ok(Err(error)) => {
                    if attempt >= self.max_retries {
                        return Err(LookupFailure::Transport(error.to_string()));
                    }
                    let delay = self.base_delay * 2u32.saturating_pow(attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn call_tool(&self, lookup: &Lookup<'_>) -> anyhow::Result<ToolEnvelope> {
        match lookup {
            Lookup::Customers(reference) => self.tools.get_customers(reference).await,
            Lookup::Orders(customer_id) => self.tools.get_customer_orders(customer_id).await,
        }
    }

    fn lookup_failure(
        &self,
        reference: &str,
        failure: LookupFailure,
    ) -> Result<ResolutionError, PipelineError> {
        match failure {
            LookupFailure::TimedOut => Err(PipelineError::Timeout {
                stage: PipelineStage::Resolution,
                timeout_secs: self.timeout.as_secs(),
            }),
            LookupFailure::Transport(message) => {
                Ok(ResolutionError::LookupFailed { reference: reference.to_string(), message })
            }
        }
    }
}

fn order_kind(kind: &ReferenceKind) -> bool {
    matches!(kind, ReferenceKind::LastOrder | ReferenceKind::OrderById(_))
}

fn candidates_from(envelope: &ToolEnvelope) -> Vec<Value> {
    match &envelope.data {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

fn customer_from_value(value: &Value) -> Option<CustomerData> {
    let object = value.as_object()?;
    let id = object.get("id").and_then(Value::as_str)?.to_string();
    let name = object.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
    let tier = object.get("tier").and_then(Value::as_str).unwrap_or("standard").to_string();
    let email = object.get("email").and_then(Value::as_str).map(String::from);
    Some(CustomerData { id, name, tier, email })
}

fn order_from_value(value: &Value, captured_at: DateTime<Utc>) -> Option<OrderData> {
    let object = value.as_object()?;
    let id = object.get("id").and_then(Value::as_str)?.to_string();
    let status = object.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN").to_string();
    let created_at = object
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))?;
    let items = object.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
    let item_count = object
        .get("item_count")
        .and_then(Value::as_u64)
        .map(|count| count as u32)
        .unwrap_or(items.len() as u32);
    let shipping_address =
        object.get("shipping_address").and_then(Value::as_str).map(String::from);
    let age_hours = captured_at.signed_duration_since(created_at).num_seconds() as f64 / 3600.0;

    Some(OrderData {
        id,
        status,
        total: decimal_from(object.get("total")),
        item_count,
        items,
        shipping_address,
        created_at,
        age_hours,
    })
}

fn decimal_from(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::String(raw)) => raw.parse().unwrap_or_default(),
        Some(Value::Number(number)) => {
            number.as_f64().and_then(Decimal::from_f64_retain).unwrap_or_default()
        }
        _ => Decimal::ZERO,
    }
}

/// Change requests carried by the intent: `new_`-prefixed parameters are
/// normalized (`new_address` -> `address`) alongside the known change keys.
fn requested_changes_from(intent: &Intent) -> BTreeMap<String, Value> {
    let mut changes = BTreeMap::new();
    for (key, value) in &intent.parameters {
        if let Some(stripped) = key.strip_prefix("new_") {
            changes.insert(stripped.to_string(), value.clone());
        } else if matches!(key.as_str(), "address" | "delivery_date" | "quantity" | "items") {
            changes.insert(key.clone(), value.clone());
        }
    }
    changes
}

/// Session facts strategies may condition on (`situation.*`). The customer
/// id is identity, not situation, so it stays out.
fn situation_from(session_context: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    session_context
        .iter()
        .filter(|(key, _)| key.as_str() != "customer_id")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
