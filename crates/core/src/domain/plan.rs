use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::strategy::StrategyId;

/// The closed set of executor agents an instruction can be routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    OrderAgent,
    PaymentAgent,
    NotificationAgent,
    CatalogAgent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub agent: AgentKind,
    pub action: String,
    pub parameters: BTreeMap<String, Value>,
    pub sequence_index: usize,
}

/// Dependency-ordered instructions for one selected strategy. Built per
/// request and handed to the external executor; only the run outcome is
/// retained afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub strategy_id: StrategyId,
    pub agent_instructions: Vec<Instruction>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.agent_instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agent_instructions.is_empty()
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.agent_instructions.iter().map(|instruction| instruction.action.as_str()).collect()
    }
}
