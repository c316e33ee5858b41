use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use concierge_core::domain::context::{ResolutionStatus, ResolvedContext};
use concierge_core::domain::plan::ExecutionPlan;
use concierge_core::domain::strategy::Strategy;
use concierge_core::engine::{Selection, StrategyEngine};
use concierge_core::errors::{PipelineError, PipelineStage};
use concierge_core::repository::StrategyRepository;
use concierge_core::trace::{StageOutcome, StageRecord, TraceSink};
use concierge_core::Intent;

use crate::classifier::IntentClassifier;
use crate::llm::CompletionClient;
use crate::resolver::ContextResolver;
use crate::session::SessionRegistry;
use crate::tools::CommerceTools;

/// Terminal result of a request that ran the pipeline to completion.
/// `NoMatch` is the explicit no-strategy outcome, not a failure.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome {
    Planned { intent: Intent, context: ResolvedContext, plan: ExecutionPlan },
    NoMatch { intent: Intent, context: ResolvedContext },
}

/// Sequences the pipeline stages for each request and enforces fail-fast
/// transitions: classification and resolution failures abort before any
/// strategy is evaluated, plan-build failures abort before execution.
///
/// Every stage exit, including typed errors and timeouts, emits one stage
/// record to the trace sink.
pub struct PipelineCoordinator<C, T> {
    classifier: IntentClassifier<C>,
    resolver: ContextResolver<T>,
    engine: StrategyEngine,
    repository: Arc<StrategyRepository>,
    sessions: SessionRegistry,
    trace: Arc<dyn TraceSink>,
}

impl<C, T> PipelineCoordinator<C, T>
where
    C: CompletionClient,
    T: CommerceTools,
{
    pub fn new(
        classifier: IntentClassifier<C>,
        resolver: ContextResolver<T>,
        repository: Arc<StrategyRepository>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            classifier,
            resolver,
            engine: StrategyEngine::new(),
            repository,
            sessions: SessionRegistry::new(),
            trace,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Run one request through the full pipeline under its session lock.
    pub async fn handle_request(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        let session = self.sessions.session(session_id);
        let mut session_context = session.lock().await;
        let request_id = Uuid::new_v4().to_string();

        info!(
            event_name = "pipeline.request_received",
            request_id = %request_id,
            session_id = %session_id,
            "customer request received"
        );

        // Classification
        let intent = match self.classifier.classify(query, &session_context.entries).await {
            Ok(intent) => {
                self.emit(
                    &request_id,
                    session_id,
                    PipelineStage::Classification,
                    StageOutcome::Success,
                    Some(intent.intent_key()),
                );
                intent
            }
            Err(error) => return Err(self.fail(&request_id, session_id, error)),
        };

        // Resolution
        let context = match self.resolver.resolve(query, &intent, &session_context.entries).await {
            Ok(context) => context,
            Err(error) => return Err(self.fail(&request_id, session_id, error)),
        };
        if context.resolution_status == ResolutionStatus::Failed {
            let error = PipelineError::Resolution { errors: context.resolution_errors.clone() };
            return Err(self.fail(&request_id, session_id, error));
        }
        self.emit(
            &request_id,
            session_id,
            PipelineStage::Resolution,
            StageOutcome::Success,
            Some(format!("{:?}", context.resolution_status)),
        );

        // The context is frozen from here on; only identity flows back into
        // the session.
        if let Some(customer) = &context.customer_data {
            session_context.set("customer_id", Value::String(customer.id.clone()));
        }

        // Strategy selection against the snapshot this request captured.
        let snapshot = self.repository.snapshot();
        let strategy = match self.engine.evaluate(&context, &intent, &snapshot) {
            Ok(Selection::Matched(strategy)) => {
                self.emit(
                    &request_id,
                    session_id,
                    PipelineStage::StrategySelection,
                    StageOutcome::Success,
                    Some(strategy.id.0.clone()),
                );
                strategy
            }
            Ok(Selection::NoStrategyMatched) => {
                self.emit(
                    &request_id,
                    session_id,
                    PipelineStage::StrategySelection,
                    StageOutcome::NoMatch,
                    None,
                );
                info!(
                    event_name = "pipeline.no_strategy_matched",
                    request_id = %request_id,
                    session_id = %session_id,
                    intent_key = %intent.intent_key(),
                    "no strategy matched; caller handles fallback"
                );
                return Ok(PipelineOutcome::NoMatch { intent, context });
            }
            Err(error) => return Err(self.fail(&request_id, session_id, error)),
        };

        // Planning
        let plan = match self.engine.execute_strategy(
            &strategy,
            &context,
            &intent,
            self.repository.action_table(),
        ) {
            Ok(plan) => {
                self.emit(
                    &request_id,
                    session_id,
                    PipelineStage::Planning,
                    StageOutcome::Success,
                    Some(format!("{} instructions", plan.len())),
                );
                plan
            }
            Err(error) => return Err(self.fail(&request_id, session_id, error)),
        };

        session_context.set("last_strategy_id", Value::String(plan.strategy_id.0.clone()));
        info!(
            event_name = "pipeline.plan_built",
            request_id = %request_id,
            session_id = %session_id,
            strategy_id = %plan.strategy_id.0,
            instruction_count = plan.len(),
            "execution plan built"
        );

        Ok(PipelineOutcome::Planned { intent, context, plan })
    }

    /// Classify without running the rest of the pipeline.
    pub async fn classify_intent(
        &self,
        query: &str,
        session_context: &BTreeMap<String, Value>,
    ) -> Result<Intent, PipelineError> {
        self.classifier.classify(query, session_context).await
    }

    /// Resolve references without running the rest of the pipeline.
    pub async fn resolve_references(
        &self,
        query: &str,
        intent: &Intent,
        session_context: &BTreeMap<String, Value>,
    ) -> Result<ResolvedContext, PipelineError> {
        self.resolver.resolve(query, intent, session_context).await
    }

    /// Evaluate strategies against the currently published snapshot.
    pub fn evaluate_strategies(
        &self,
        context: &ResolvedContext,
        intent: &Intent,
    ) -> Result<Selection, PipelineError> {
        self.engine.evaluate(context, intent, &self.repository.snapshot())
    }

    /// Expand a selected strategy into its execution plan.
    pub fn execute_strategy(
        &self,
        strategy: &Strategy,
        context: &ResolvedContext,
        intent: &Intent,
    ) -> Result<ExecutionPlan, PipelineError> {
        self.engine.execute_strategy(strategy, context, intent, self.repository.action_table())
    }

    fn emit(
        &self,
        request_id: &str,
        session_id: &str,
        stage: PipelineStage,
        outcome: StageOutcome,
        detail: Option<String>,
    ) {
        let mut record = StageRecord::new(request_id, session_id, stage, outcome);
        if let Some(detail) = detail {
            record = record.with_detail(detail);
        }
        self.trace.emit(record);
    }

    fn fail(&self, request_id: &str, session_id: &str, error: PipelineError) -> PipelineError {
        let outcome = match error {
            PipelineError::Timeout { .. } => StageOutcome::TimedOut,
            _ => StageOutcome::Failed,
        };
        self.emit(request_id, session_id, error.stage(), outcome, Some(error.to_string()));
        info!(
            event_name = "pipeline.stage_failed",
            request_id = %request_id,
            session_id = %session_id,
            stage = ?error.stage(),
            error = %error,
            "pipeline stage failed"
        );
        error
    }
}
