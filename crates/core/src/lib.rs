pub mod actions;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod planner;
pub mod predicate;
pub mod repository;
pub mod trace;

pub use actions::{ActionBinding, ActionTable};
pub use domain::commerce::{CustomerData, OrderData};
pub use domain::context::{FieldValue, ResolutionStatus, ResolvedContext};
pub use domain::intent::Intent;
pub use domain::plan::{AgentKind, ExecutionPlan, Instruction};
pub use domain::strategy::{ActionRef, CompareOp, Condition, Strategy, StrategyId};
pub use engine::{Selection, StrategyEngine};
pub use errors::{PipelineError, PipelineStage, ResolutionError, ValidationError};
pub use planner::plan;
pub use predicate::PredicateEvaluator;
pub use repository::{StrategyRepository, StrategySnapshot};
pub use trace::{InMemoryTraceSink, StageOutcome, StageRecord, TraceSink};
