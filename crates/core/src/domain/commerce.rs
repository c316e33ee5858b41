use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A customer's order as grounded by the resolver. `age_hours` is computed
/// against the context capture instant so condition evaluation never reads
/// the wall clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderData {
    pub id: String,
    pub status: String,
    pub total: Decimal,
    pub item_count: u32,
    #[serde(default)]
    pub items: Vec<Value>,
    pub shipping_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub age_hours: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerData {
    pub id: String,
    pub name: String,
    pub tier: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::OrderData;

    #[test]
    fn order_data_round_trips_through_json() {
        let order = OrderData {
            id: "ord-100".to_string(),
            status: "CONFIRMED".to_string(),
            total: Decimal::new(12_999, 2),
            item_count: 2,
            items: vec![serde_json::json!({"sku": "widget", "qty": 2})],
            shipping_address: Some("12 Elm St".to_string()),
            created_at: Utc::now(),
            age_hours: 2.0,
        };

        let encoded = serde_json::to_string(&order).expect("serialize");
        let decoded: OrderData = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, order);
    }
}
