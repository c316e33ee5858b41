use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::plan::AgentKind;

/// Binding from a logical business action to the agent that executes it,
/// the concrete tool instruction, and the parameter keys the planner must
/// bind before the plan is considered buildable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBinding {
    pub agent: AgentKind,
    pub tool: String,
    pub required_params: Vec<String>,
}

/// The closed action table. Fixed at startup and consulted by repository
/// validation, so an unmapped action surfaces when a document loads rather
/// than when a customer request is in flight.
#[derive(Clone, Debug, Default)]
pub struct ActionTable {
    bindings: BTreeMap<String, ActionBinding>,
}

impl ActionTable {
    pub fn with_bindings(entries: Vec<(&str, ActionBinding)>) -> Self {
        let bindings =
            entries.into_iter().map(|(name, binding)| (name.to_string(), binding)).collect();
        Self { bindings }
    }

    pub fn get(&self, action_name: &str) -> Option<&ActionBinding> {
        self.bindings.get(action_name)
    }

    pub fn contains(&self, action_name: &str) -> bool {
        self.bindings.contains_key(action_name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The standard customer-service action set.
    ///
    /// Parameter keys bind from, in order: intent parameters, requested
    /// changes, then derived context fields (`order_id`, `customer_id`,
    /// `amount`, `items`, `new_address`, `email`); see the planner.
    pub fn standard() -> Self {
        use AgentKind::{CatalogAgent, NotificationAgent, OrderAgent, PaymentAgent};

        Self::with_bindings(vec![
            (
                "validate_address",
                binding(OrderAgent, "validate_address", &["order_id", "new_address"]),
            ),
            ("update_order", binding(OrderAgent, "update_order", &["order_id"])),
            ("cancel_order", binding(OrderAgent, "cancel_order", &["order_id"])),
            ("create_new_order", binding(OrderAgent, "create_order", &["customer_id", "items"])),
            ("lookup_order", binding(OrderAgent, "get_customer_orders", &["customer_id"])),
            (
                "issue_gift_card",
                binding(PaymentAgent, "issue_gift_card", &["customer_id", "amount"]),
            ),
            ("apply_gift_card", binding(PaymentAgent, "apply_gift_card", &["customer_id"])),
            ("issue_refund", binding(PaymentAgent, "issue_refund", &["order_id", "amount"])),
            (
                "send_confirmation",
                binding(NotificationAgent, "send_confirmation", &["customer_id"]),
            ),
            (
                "notify_delay",
                binding(NotificationAgent, "notify_delay", &["customer_id", "order_id"]),
            ),
            ("suggest_alternatives", binding(CatalogAgent, "search_products", &["customer_id"])),
        ])
    }
}

fn binding(agent: AgentKind, tool: &str, required_params: &[&str]) -> ActionBinding {
    ActionBinding {
        agent,
        tool: tool.to_string(),
        required_params: required_params.iter().map(|key| (*key).to_string()).collect(),
    }
}
