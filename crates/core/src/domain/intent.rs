use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured interpretation of one customer request. Produced once per
/// request by the classifier and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_type: String,
    pub action: String,
    pub target_entity: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub unresolved_refs: BTreeSet<String>,
    pub confidence: f64,
}

impl Intent {
    /// Key used to match against `Strategy::applicable_intents`.
    pub fn intent_key(&self) -> String {
        format!("{}:{}", self.intent_type, self.action)
    }

    /// Whether this intent operates on an order and therefore needs a
    /// grounded order before any strategy may be evaluated.
    pub fn requires_order(&self) -> bool {
        self.target_entity.eq_ignore_ascii_case("order")
    }

    pub fn requires_customer(&self) -> bool {
        matches!(self.target_entity.to_ascii_lowercase().as_str(), "customer" | "account")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::Intent;

    #[test]
    fn intent_key_combines_type_and_action() {
        let intent = Intent {
            intent_type: "order_modification".to_string(),
            action: "change_address".to_string(),
            target_entity: "order".to_string(),
            parameters: BTreeMap::new(),
            unresolved_refs: BTreeSet::new(),
            confidence: 0.9,
        };
        assert_eq!(intent.intent_key(), "order_modification:change_address");
        assert!(intent.requires_order());
        assert!(!intent.requires_customer());
    }

    #[test]
    fn account_targets_require_customer_grounding() {
        let intent = Intent {
            intent_type: "account_inquiry".to_string(),
            action: "update_email".to_string(),
            target_entity: "Account".to_string(),
            parameters: BTreeMap::new(),
            unresolved_refs: BTreeSet::new(),
            confidence: 0.7,
        };
        assert!(intent.requires_customer());
        assert!(!intent.requires_order());
    }
}
