use std::collections::BTreeMap;

use serde_json::Value;

use crate::actions::{ActionBinding, ActionTable};
use crate::domain::context::ResolvedContext;
use crate::domain::intent::Intent;
use crate::domain::plan::{ExecutionPlan, Instruction};
use crate::domain::strategy::Strategy;
use crate::errors::PipelineError;

/// Expand a selected strategy into a dependency-ordered execution plan.
///
/// The ordering is a stable Kahn walk: among actions whose dependencies are
/// all placed, declaration order decides. Cycles are normally caught at
/// document load; hand-built strategies still get the typed error here.
pub fn plan(
    strategy: &Strategy,
    context: &ResolvedContext,
    intent: &Intent,
    table: &ActionTable,
) -> Result<ExecutionPlan, PipelineError> {
    let order = topological_order(strategy)?;

    let mut agent_instructions = Vec::with_capacity(order.len());
    for (sequence_index, action_index) in order.into_iter().enumerate() {
        let action = &strategy.actions[action_index];
        let binding = table.get(&action.action_name).ok_or_else(|| {
            PipelineError::UnmappedAction { action: action.action_name.clone() }
        })?;
        let parameters = bind_parameters(&action.action_name, binding, context, intent)?;
        agent_instructions.push(Instruction {
            agent: binding.agent,
            action: action.action_name.clone(),
            parameters,
            sequence_index,
        });
    }

    Ok(ExecutionPlan { strategy_id: strategy.id.clone(), agent_instructions })
}

fn topological_order(strategy: &Strategy) -> Result<Vec<usize>, PipelineError> {
    let actions = &strategy.actions;
    let index_of = |name: &str| {
        actions.iter().position(|candidate| candidate.action_name == name)
    };

    let mut placed = vec![false; actions.len()];
    let mut order = Vec::with_capacity(actions.len());

    while order.len() < actions.len() {
        let mut advanced = false;
        for (index, action) in actions.iter().enumerate() {
            if placed[index] {
                continue;
            }
            let ready = action.depends_on.iter().all(|dependency| {
                index_of(dependency).map(|dep| placed[dep]).unwrap_or(true)
            });
            if ready {
                placed[index] = true;
                order.push(index);
                advanced = true;
                break;
            }
        }
        if !advanced {
            return Err(PipelineError::DependencyCycle { strategy_id: strategy.id.0.clone() });
        }
    }

    Ok(order)
}

/// Bind one instruction's required parameter keys.
///
/// Sources, in precedence order:
/// 1. the intent's own parameters (verbatim key);
/// 2. `requested_changes` (verbatim key, then the key with a `new_` prefix
///    stripped, so `new_address` binds from `changes.address`);
/// 3. derived context fields: `order_id`, `customer_id`, `amount` (order
///    total), `items` (order items), `email` (customer email).
///
/// Any required key left unbound is a typed `ParameterBinding` failure.
fn bind_parameters(
    action_name: &str,
    binding: &ActionBinding,
    context: &ResolvedContext,
    intent: &Intent,
) -> Result<BTreeMap<String, Value>, PipelineError> {
    let mut parameters = BTreeMap::new();
    for key in &binding.required_params {
        let value = bind_key(key, context, intent).ok_or_else(|| {
            PipelineError::ParameterBinding { action: action_name.to_string(), key: key.clone() }
        })?;
        parameters.insert(key.clone(), value);
    }
    Ok(parameters)
}

fn bind_key(key: &str, context: &ResolvedContext, intent: &Intent) -> Option<Value> {
    if let Some(value) = intent.parameters.get(key) {
        return Some(value.clone());
    }
    if let Some(value) = context.requested_changes.get(key) {
        return Some(value.clone());
    }
    if let Some(stripped) = key.strip_prefix("new_") {
        if let Some(value) = context.requested_changes.get(stripped) {
            return Some(value.clone());
        }
    }

    match key {
        "order_id" => context.order_data.as_ref().map(|order| Value::String(order.id.clone())),
        "customer_id" => {
            context.customer_data.as_ref().map(|customer| Value::String(customer.id.clone()))
        }
        "amount" => context
            .order_data
            .as_ref()
            .map(|order| Value::String(order.total.to_string())),
        "items" => context.order_data.as_ref().map(|order| Value::Array(order.items.clone())),
        "email" => context
            .customer_data
            .as_ref()
            .and_then(|customer| customer.email.clone())
            .map(Value::String),
        _ => None,
    }
}
