use tracing::debug;

use crate::actions::ActionTable;
use crate::domain::context::{ResolutionStatus, ResolvedContext};
use crate::domain::intent::Intent;
use crate::domain::plan::ExecutionPlan;
use crate::domain::strategy::Strategy;
use crate::errors::PipelineError;
use crate::planner;
use crate::predicate::PredicateEvaluator;
use crate::repository::StrategySnapshot;

/// Outcome of strategy selection. `NoStrategyMatched` is a valid terminal
/// result, not an error; callers decide the fallback messaging.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Matched(Strategy),
    NoStrategyMatched,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StrategyEngine {
    evaluator: PredicateEvaluator,
}

impl StrategyEngine {
    pub fn new() -> Self {
        Self { evaluator: PredicateEvaluator::new() }
    }

    /// Select at most one strategy for the request.
    ///
    /// Refuses to evaluate against a failed resolution: the resolver's
    /// errors propagate instead, and no condition is ever checked against
    /// ungrounded data. Tie-break order is priority, then condition count,
    /// then declaration order, and is reproducible by contract.
    pub fn evaluate(
        &self,
        context: &ResolvedContext,
        intent: &Intent,
        snapshot: &StrategySnapshot,
    ) -> Result<Selection, PipelineError> {
        if context.resolution_status == ResolutionStatus::Failed {
            return Err(PipelineError::Resolution { errors: context.resolution_errors.clone() });
        }

        let candidates = snapshot.candidates_for(&intent.intent_type, &intent.action);
        let satisfied: Vec<&Strategy> = candidates
            .into_iter()
            .filter(|strategy| self.evaluator.all_hold(&strategy.conditions, context))
            .collect();

        debug!(
            event_name = "engine.candidates_evaluated",
            intent_key = %intent.intent_key(),
            satisfied = satisfied.len(),
            snapshot_version = snapshot.version(),
            "strategy candidates evaluated"
        );

        let Some(mut best) = satisfied.first().copied() else {
            return Ok(Selection::NoStrategyMatched);
        };
        for candidate in satisfied.iter().skip(1).copied() {
            if wins_tie_break(candidate, best) {
                best = candidate;
            }
        }
        Ok(Selection::Matched(best.clone()))
    }

    /// Expand a selected strategy into its execution plan through the
    /// load-time-validated action table.
    pub fn execute_strategy(
        &self,
        strategy: &Strategy,
        context: &ResolvedContext,
        intent: &Intent,
        table: &ActionTable,
    ) -> Result<ExecutionPlan, PipelineError> {
        planner::plan(strategy, context, intent, table)
    }
}

/// Strict-win comparison: a later candidate displaces the current best only
/// on higher priority, or on more conditions at equal priority. Equal on
/// both keeps the earlier declaration.
fn wins_tie_break(challenger: &Strategy, incumbent: &Strategy) -> bool {
    if challenger.priority != incumbent.priority {
        return challenger.priority > incumbent.priority;
    }
    challenger.conditions.len() > incumbent.conditions.len()
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::actions::ActionTable;
    use crate::domain::commerce::{CustomerData, OrderData};
    use crate::domain::context::{ResolutionStatus, ResolvedContext};
    use crate::domain::intent::Intent;
    use crate::engine::{Selection, StrategyEngine};
    use crate::errors::{PipelineError, ResolutionError};
    use crate::repository::StrategyRepository;

    #[test]
    fn failed_resolution_propagates_without_evaluating() {
        let engine = StrategyEngine::new();
        let repository = repository_with(SCENARIO_DOCUMENT);
        let mut context = context_fixture("CONFIRMED", 2.0);
        context.resolution_status = ResolutionStatus::Failed;
        context.resolution_errors =
            vec![ResolutionError::NoOrdersFound { reference: "my last order".to_string() }];

        let error = engine
            .evaluate(&context, &intent_fixture(), &repository.snapshot())
            .expect_err("must fail fast");
        assert!(matches!(error, PipelineError::Resolution { ref errors } if errors.len() == 1));
    }

    #[test]
    fn fresh_confirmed_order_selects_standard_change() {
        let engine = StrategyEngine::new();
        let repository = repository_with(SCENARIO_DOCUMENT);
        let context = context_fixture("CONFIRMED", 2.0);

        let selection = engine
            .evaluate(&context, &intent_fixture(), &repository.snapshot())
            .expect("evaluate");
        let Selection::Matched(strategy) = selection else {
            panic!("expected a match");
        };
        assert_eq!(strategy.id.0, "standard_change");
    }

    #[test]
    fn shipped_stale_order_selects_cancel_reorder() {
        let engine = StrategyEngine::new();
        let repository = repository_with(SCENARIO_DOCUMENT);
        let context = context_fixture("SHIPPED", 48.0);

        let selection = engine
            .evaluate(&context, &intent_fixture(), &repository.snapshot())
            .expect("evaluate");
        assert!(
            matches!(selection, Selection::Matched(ref strategy) if strategy.id.0 == "cancel_reorder")
        );
    }

    #[test]
    fn no_satisfied_candidate_is_an_explicit_no_match() {
        let engine = StrategyEngine::new();
        let repository = repository_with(SCENARIO_DOCUMENT);
        // DELIVERED matches neither strategy's status set.
        let context = context_fixture("DELIVERED", 200.0);

        let selection = engine
            .evaluate(&context, &intent_fixture(), &repository.snapshot())
            .expect("evaluate");
        assert_eq!(selection, Selection::NoStrategyMatched);
    }

    #[test]
    fn evaluation_is_idempotent_for_a_snapshot_and_context() {
        let engine = StrategyEngine::new();
        let repository = repository_with(SCENARIO_DOCUMENT);
        let snapshot = repository.snapshot();
        let context = context_fixture("CONFIRMED", 2.0);
        let intent = intent_fixture();

        let first = engine.evaluate(&context, &intent, &snapshot).expect("first");
        let second = engine.evaluate(&context, &intent, &snapshot).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn higher_priority_wins_the_first_tie_break() {
        let engine = StrategyEngine::new();
        let repository = repository_with(TIE_PRIORITY_DOCUMENT);
        let context = context_fixture("CONFIRMED", 2.0);

        let selection = engine
            .evaluate(&context, &intent_fixture(), &repository.snapshot())
            .expect("evaluate");
        assert!(
            matches!(selection, Selection::Matched(ref strategy) if strategy.id.0 == "vip_change")
        );
    }

    #[test]
    fn condition_count_breaks_equal_priority() {
        let engine = StrategyEngine::new();
        let repository = repository_with(TIE_SPECIFICITY_DOCUMENT);
        let context = context_fixture("CONFIRMED", 2.0);

        let selection = engine
            .evaluate(&context, &intent_fixture(), &repository.snapshot())
            .expect("evaluate");
        assert!(
            matches!(selection, Selection::Matched(ref strategy) if strategy.id.0 == "specific_change")
        );
    }

    #[test]
    fn declaration_order_breaks_remaining_ties() {
        let engine = StrategyEngine::new();
        let repository = repository_with(TIE_DECLARATION_DOCUMENT);
        let context = context_fixture("CONFIRMED", 2.0);

        let selection = engine
            .evaluate(&context, &intent_fixture(), &repository.snapshot())
            .expect("evaluate");
        assert!(
            matches!(selection, Selection::Matched(ref strategy) if strategy.id.0 == "first_declared")
        );
    }

    #[test]
    fn execute_strategy_builds_the_plan_for_the_selection() {
        let engine = StrategyEngine::new();
        let repository = repository_with(SCENARIO_DOCUMENT);
        let snapshot = repository.snapshot();
        let context = context_fixture("CONFIRMED", 2.0);
        let intent = intent_fixture();

        let Selection::Matched(strategy) =
            engine.evaluate(&context, &intent, &snapshot).expect("evaluate")
        else {
            panic!("expected a match");
        };
        let plan = engine
            .execute_strategy(&strategy, &context, &intent, repository.action_table())
            .expect("plan");
        assert_eq!(
            plan.action_names(),
            vec!["validate_address", "update_order", "send_confirmation"]
        );
    }

    fn repository_with(document: &str) -> StrategyRepository {
        let repository = StrategyRepository::new(ActionTable::standard());
        repository.load_str(document).expect("fixture document loads");
        repository
    }

    fn intent_fixture() -> Intent {
        Intent {
            intent_type: "order_modification".to_string(),
            action: "change_address".to_string(),
            target_entity: "order".to_string(),
            parameters: BTreeMap::from([(
                "new_address".to_string(),
                serde_json::json!("44 Cedar Loop"),
            )]),
            unresolved_refs: BTreeSet::new(),
            confidence: 0.9,
        }
    }

    fn context_fixture(status: &str, age_hours: f64) -> ResolvedContext {
        ResolvedContext {
            user_query: "change my delivery address".to_string(),
            order_data: Some(OrderData {
                id: "ord-1".to_string(),
                status: status.to_string(),
                total: Decimal::new(9_900, 2),
                item_count: 1,
                items: vec![serde_json::json!({"sku": "desk", "qty": 1})],
                shipping_address: Some("9 Birch Rd".to_string()),
                created_at: Utc::now(),
                age_hours,
            }),
            customer_data: Some(CustomerData {
                id: "cust-1".to_string(),
                name: "Dana Reyes".to_string(),
                tier: "gold".to_string(),
                email: None,
            }),
            current_situation: BTreeMap::new(),
            requested_changes: BTreeMap::new(),
            resolution_status: ResolutionStatus::Resolved,
            resolution_errors: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    const SCENARIO_DOCUMENT: &str = r#"
[[strategies]]
id = "standard_change"
name = "Standard address change"
applicable_intents = ["order_modification:change_address"]
priority = 10

[[strategies.conditions]]
kind = "field_in_set"
field = "order.status"
values = ["CONFIRMED", "PROCESSING"]

[[strategies.conditions]]
kind = "numeric_threshold"
field = "order.age_hours"
op = "le"
value = 24.0

[[strategies.actions]]
action_name = "validate_address"

[[strategies.actions]]
action_name = "update_order"
depends_on = ["validate_address"]

[[strategies.actions]]
action_name = "send_confirmation"
depends_on = ["update_order"]

[[strategies]]
id = "cancel_reorder"
name = "Cancel and reorder"
applicable_intents = ["order_modification:change_address"]
priority = 10

[[strategies.conditions]]
kind = "field_in_set"
field = "order.status"
values = ["SHIPPED", "IN_TRANSIT"]

[[strategies.conditions]]
kind = "numeric_threshold"
field = "order.age_hours"
op = "gt"
value = 24.0

[[strategies.actions]]
action_name = "cancel_order"

[[strategies.actions]]
action_name = "issue_gift_card"
depends_on = ["cancel_order"]

[[strategies.actions]]
action_name = "create_new_order"
depends_on = ["cancel_order"]

[[strategies.actions]]
action_name = "apply_gift_card"
depends_on = ["issue_gift_card", "create_new_order"]
"#;

    const TIE_PRIORITY_DOCUMENT: &str = r#"
[[strategies]]
id = "plain_change"
name = "Plain change"
applicable_intents = ["order_modification:change_address"]
priority = 5

[[strategies.conditions]]
kind = "field_equals"
field = "order.status"
value = "CONFIRMED"

[[strategies.actions]]
action_name = "update_order"

[[strategies]]
id = "vip_change"
name = "VIP change"
applicable_intents = ["order_modification:change_address"]
priority = 20

[[strategies.conditions]]
kind = "field_equals"
field = "order.status"
value = "CONFIRMED"

[[strategies.actions]]
action_name = "update_order"
"#;

    const TIE_SPECIFICITY_DOCUMENT: &str = r#"
[[strategies]]
id = "broad_change"
name = "Broad change"
applicable_intents = ["order_modification:change_address"]
priority = 10

[[strategies.conditions]]
kind = "field_equals"
field = "order.status"
value = "CONFIRMED"

[[strategies.actions]]
action_name = "update_order"

[[strategies]]
id = "specific_change"
name = "Specific change"
applicable_intents = ["order_modification:change_address"]
priority = 10

[[strategies.conditions]]
kind = "field_equals"
field = "order.status"
value = "CONFIRMED"

[[strategies.conditions]]
kind = "numeric_threshold"
field = "order.age_hours"
op = "le"
value = 24.0

[[strategies.actions]]
action_name = "update_order"
"#;

    const TIE_DECLARATION_DOCUMENT: &str = r#"
[[strategies]]
id = "first_declared"
name = "First declared"
applicable_intents = ["order_modification:change_address"]
priority = 10

[[strategies.conditions]]
kind = "field_equals"
field = "order.status"
value = "CONFIRMED"

[[strategies.actions]]
action_name = "update_order"

[[strategies]]
id = "second_declared"
name = "Second declared"
applicable_intents = ["order_modification:change_address"]
priority = 10

[[strategies.conditions]]
kind = "field_equals"
field = "order.status"
value = "CONFIRMED"

[[strategies.actions]]
action_name = "update_order"
"#;
}
