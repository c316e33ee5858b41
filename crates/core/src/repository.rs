use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::actions::ActionTable;
use crate::domain::strategy::Strategy;
use crate::errors::ValidationError;

#[derive(Debug, Deserialize)]
struct StrategyDocument {
    #[serde(default)]
    strategies: Vec<Strategy>,
}

/// An immutable, validated view of one loaded strategy document.
///
/// Declaration order is the vector order and is part of the tie-break
/// contract, so `candidates_for` always returns candidates in that order.
#[derive(Debug)]
pub struct StrategySnapshot {
    strategies: Vec<Strategy>,
    by_intent: BTreeMap<String, Vec<usize>>,
    version: u64,
}

impl StrategySnapshot {
    fn empty() -> Self {
        Self { strategies: Vec::new(), by_intent: BTreeMap::new(), version: 0 }
    }

    fn build(strategies: Vec<Strategy>, version: u64) -> Self {
        let mut by_intent: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, strategy) in strategies.iter().enumerate() {
            for intent_key in &strategy.applicable_intents {
                by_intent.entry(intent_key.clone()).or_default().push(index);
            }
        }
        Self { strategies, by_intent, version }
    }

    pub fn candidates_for(&self, intent_type: &str, action: &str) -> Vec<&Strategy> {
        let key = format!("{intent_type}:{action}");
        self.by_intent
            .get(&key)
            .into_iter()
            .flatten()
            .map(|index| &self.strategies[*index])
            .collect()
    }

    /// Index of a strategy in declaration order; feeds the final tie-break.
    pub fn declaration_index(&self, strategy_id: &str) -> Option<usize> {
        self.strategies.iter().position(|strategy| strategy.id.0 == strategy_id)
    }

    pub fn get(&self, strategy_id: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|strategy| strategy.id.0 == strategy_id)
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Loads, validates, and publishes strategy snapshots.
///
/// A reload constructs and validates the whole replacement snapshot before
/// a single atomic swap; a document that fails validation is rejected
/// wholesale and the previous snapshot stays published. In-flight requests
/// keep whatever snapshot they captured.
pub struct StrategyRepository {
    table: ActionTable,
    current: RwLock<Arc<StrategySnapshot>>,
}

impl StrategyRepository {
    pub fn new(table: ActionTable) -> Self {
        Self { table, current: RwLock::new(Arc::new(StrategySnapshot::empty())) }
    }

    pub fn action_table(&self) -> &ActionTable {
        &self.table
    }

    /// Parse, validate, and publish a strategy document.
    pub fn load_str(&self, source: &str) -> Result<Arc<StrategySnapshot>, ValidationError> {
        let document: StrategyDocument =
            toml::from_str(source).map_err(|error| ValidationError::Parse(error.to_string()))?;
        validate_document(&document.strategies, &self.table)?;

        let next_version = self.snapshot().version() + 1;
        let snapshot = Arc::new(StrategySnapshot::build(document.strategies, next_version));
        match self.current.write() {
            Ok(mut current) => *current = Arc::clone(&snapshot),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&snapshot),
        }
        Ok(snapshot)
    }

    pub fn load_path(&self, path: &Path) -> Result<Arc<StrategySnapshot>, ValidationError> {
        let source = std::fs::read_to_string(path).map_err(|error| {
            ValidationError::Parse(format!("could not read `{}`: {error}", path.display()))
        })?;
        self.load_str(&source)
    }

    /// The currently published snapshot. Cheap to call per request.
    pub fn snapshot(&self) -> Arc<StrategySnapshot> {
        match self.current.read() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

fn validate_document(strategies: &[Strategy], table: &ActionTable) -> Result<(), ValidationError> {
    let mut seen_ids = BTreeSet::new();
    for strategy in strategies {
        let strategy_id = strategy.id.0.clone();
        if strategy_id.trim().is_empty() {
            return Err(ValidationError::MissingField { strategy_id, field: "id" });
        }
        if !seen_ids.insert(strategy_id.clone()) {
            return Err(ValidationError::DuplicateId { strategy_id });
        }
        if strategy.applicable_intents.is_empty() {
            return Err(ValidationError::MissingField { strategy_id, field: "applicable_intents" });
        }
        if strategy.conditions.is_empty() {
            return Err(ValidationError::MissingField { strategy_id, field: "conditions" });
        }
        if strategy.actions.is_empty() {
            return Err(ValidationError::MissingField { strategy_id, field: "actions" });
        }
        validate_actions(strategy, table)?;
    }
    Ok(())
}

fn validate_actions(strategy: &Strategy, table: &ActionTable) -> Result<(), ValidationError> {
    let strategy_id = strategy.id.0.clone();
    let declared: BTreeSet<&str> =
        strategy.actions.iter().map(|action| action.action_name.as_str()).collect();

    for action in &strategy.actions {
        if !table.contains(&action.action_name) {
            return Err(ValidationError::UnmappedAction {
                strategy_id,
                action: action.action_name.clone(),
            });
        }
        for dependency in &action.depends_on {
            if !declared.contains(dependency.as_str()) {
                return Err(ValidationError::UnknownDependency {
                    strategy_id,
                    action: action.action_name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    check_acyclic(strategy)
}

/// Depth-first cycle check over the strategy's own `depends_on` edges.
fn check_acyclic(strategy: &Strategy) -> Result<(), ValidationError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let names: Vec<&str> = strategy.actions.iter().map(|a| a.action_name.as_str()).collect();
    let index_of = |name: &str| names.iter().position(|candidate| *candidate == name);
    let mut marks = vec![Mark::Unvisited; names.len()];

    fn visit(
        node: usize,
        strategy: &Strategy,
        index_of: &dyn Fn(&str) -> Option<usize>,
        marks: &mut [Mark],
    ) -> Result<(), usize> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(node),
            Mark::Unvisited => {}
        }
        marks[node] = Mark::InProgress;
        for dependency in &strategy.actions[node].depends_on {
            if let Some(next) = index_of(dependency) {
                visit(next, strategy, index_of, marks)?;
            }
        }
        marks[node] = Mark::Done;
        Ok(())
    }

    for node in 0..names.len() {
        if let Err(offender) = visit(node, strategy, &index_of, &mut marks) {
            return Err(ValidationError::DependencyCycle {
                strategy_id: strategy.id.0.clone(),
                action: names[offender].to_string(),
            });
        }
    }
    Ok(())
}
