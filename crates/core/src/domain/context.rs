use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::commerce::{CustomerData, OrderData};
use crate::errors::ResolutionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    Resolved,
    Partial,
    Failed,
}

/// An intent's references grounded against live order/customer state.
/// Built once by the resolver; read-only input to strategy evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedContext {
    pub user_query: String,
    pub order_data: Option<OrderData>,
    pub customer_data: Option<CustomerData>,
    pub current_situation: BTreeMap<String, Value>,
    pub requested_changes: BTreeMap<String, Value>,
    pub resolution_status: ResolutionStatus,
    pub resolution_errors: Vec<ResolutionError>,
    pub captured_at: DateTime<Utc>,
}

/// A single comparable value pulled out of the context by dotted path.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    fn from_json(value: &Value) -> Option<FieldValue> {
        match value {
            Value::Bool(flag) => Some(FieldValue::Flag(*flag)),
            Value::Number(number) => number.as_f64().map(FieldValue::Number),
            Value::String(text) => Some(FieldValue::Text(text.clone())),
            _ => None,
        }
    }
}

impl ResolvedContext {
    /// Look up a condition field by dotted path. Recognized roots are
    /// `order`, `customer`, `situation`, and `changes`; an unknown path or
    /// an ungrounded root yields `None`.
    pub fn field(&self, path: &str) -> Option<FieldValue> {
        let (root, rest) = path.split_once('.')?;
        match root {
            "order" => self.order_field(rest),
            "customer" => self.customer_field(rest),
            "situation" => self.current_situation.get(rest).and_then(FieldValue::from_json),
            "changes" => self.requested_changes.get(rest).and_then(FieldValue::from_json),
            _ => None,
        }
    }

    fn order_field(&self, name: &str) -> Option<FieldValue> {
        let order = self.order_data.as_ref()?;
        match name {
            "id" => Some(FieldValue::Text(order.id.clone())),
            "status" => Some(FieldValue::Text(order.status.clone())),
            "total" => order.total.to_f64().map(FieldValue::Number),
            "item_count" => Some(FieldValue::Number(f64::from(order.item_count))),
            "age_hours" => Some(FieldValue::Number(order.age_hours)),
            "created_at" => Some(FieldValue::Timestamp(order.created_at)),
            "shipping_address" => order.shipping_address.clone().map(FieldValue::Text),
            _ => None,
        }
    }

    fn customer_field(&self, name: &str) -> Option<FieldValue> {
        let customer = self.customer_data.as_ref()?;
        match name {
            "id" => Some(FieldValue::Text(customer.id.clone())),
            "name" => Some(FieldValue::Text(customer.name.clone())),
            "tier" => Some(FieldValue::Text(customer.tier.clone())),
            "email" => customer.email.clone().map(FieldValue::Text),
            _ => None,
        }
    }
}
