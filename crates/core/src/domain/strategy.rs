use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// One structured comparison against a context field. The optional `label`
/// keeps the rule author's original wording for humans; evaluation never
/// reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    FieldEquals {
        field: String,
        value: String,
        #[serde(default)]
        label: Option<String>,
    },
    FieldInSet {
        field: String,
        values: Vec<String>,
        #[serde(default)]
        label: Option<String>,
    },
    NumericThreshold {
        field: String,
        op: CompareOp,
        value: f64,
        #[serde(default)]
        label: Option<String>,
    },
    TimeWindow {
        field: String,
        max_age_hours: f64,
        #[serde(default)]
        label: Option<String>,
    },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Self::FieldEquals { field, .. }
            | Self::FieldInSet { field, .. }
            | Self::NumericThreshold { field, .. }
            | Self::TimeWindow { field, .. } => field,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::FieldEquals { label, .. }
            | Self::FieldInSet { label, .. }
            | Self::NumericThreshold { label, .. }
            | Self::TimeWindow { label, .. } => label.as_deref(),
        }
    }
}

/// A logical business action inside a strategy, with the actions it must
/// run after. Names are resolved against the action binding table at load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    pub action_name: String,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl ActionRef {
    pub fn new(action_name: impl Into<String>) -> Self {
        Self { action_name: action_name.into(), depends_on: BTreeSet::new() }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.insert(dependency.into());
        self
    }
}

/// A declarative rule: all conditions must hold for the strategy to apply,
/// and its actions expand into the execution plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub name: String,
    pub applicable_intents: BTreeSet<String>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<ActionRef>,
    #[serde(default)]
    pub priority: i32,
}

impl Strategy {
    pub fn applies_to(&self, intent_key: &str) -> bool {
        self.applicable_intents.contains(intent_key)
    }
}
