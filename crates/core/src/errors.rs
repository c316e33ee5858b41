use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stage tags attached to every pipeline failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Classification,
    Resolution,
    StrategySelection,
    Planning,
    Execution,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionError {
    #[error("no orders found for reference `{reference}`")]
    NoOrdersFound { reference: String },
    #[error("reference `{reference}` matched {candidates} candidates")]
    AmbiguousReference { reference: String, candidates: usize },
    #[error("no customer found for reference `{reference}`")]
    CustomerNotFound { reference: String },
    #[error("lookup for reference `{reference}` failed: {message}")]
    LookupFailed { reference: String, message: String },
    #[error("reference `{reference}` is not a recognized reference kind")]
    UnknownReference { reference: String },
}

impl ResolutionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoOrdersFound { .. } => "no_orders_found",
            Self::AmbiguousReference { .. } => "ambiguous_reference",
            Self::CustomerNotFound { .. } => "customer_not_found",
            Self::LookupFailed { .. } => "lookup_failed",
            Self::UnknownReference { .. } => "unknown_reference",
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            Self::NoOrdersFound { reference }
            | Self::AmbiguousReference { reference, .. }
            | Self::CustomerNotFound { reference }
            | Self::LookupFailed { reference, .. }
            | Self::UnknownReference { reference } => reference,
        }
    }
}

/// Raised while loading a strategy document. Always names the offending
/// strategy and field so a bad document can be fixed without a debugger.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("strategy document could not be parsed: {0}")]
    Parse(String),
    #[error("strategy `{strategy_id}` is missing required field `{field}`")]
    MissingField { strategy_id: String, field: &'static str },
    #[error("duplicate strategy id `{strategy_id}`")]
    DuplicateId { strategy_id: String },
    #[error("strategy `{strategy_id}` action `{action}` depends on undeclared action `{dependency}`")]
    UnknownDependency { strategy_id: String, action: String, dependency: String },
    #[error("strategy `{strategy_id}` has a dependency cycle involving action `{action}`")]
    DependencyCycle { strategy_id: String, action: String },
    #[error("strategy `{strategy_id}` action `{action}` has no registered tool binding")]
    UnmappedAction { strategy_id: String, action: String },
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("intent classification failed after corrective retry: {detail}")]
    Classification { detail: String },
    #[error("context resolution failed: {}", format_resolution_errors(.errors))]
    Resolution { errors: Vec<ResolutionError> },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("action `{action}` has no registered tool binding")]
    UnmappedAction { action: String },
    #[error("dependency cycle detected while planning strategy `{strategy_id}`")]
    DependencyCycle { strategy_id: String },
    #[error("parameter `{key}` required by action `{action}` could not be bound")]
    ParameterBinding { action: String, key: String },
    #[error(
        "tool call failed at instruction {instruction_index} ({completed} completed): {message}"
    )]
    ExternalTool { instruction_index: usize, completed: usize, message: String },
    #[error("{stage:?} stage timed out after {timeout_secs}s")]
    Timeout { stage: PipelineStage, timeout_secs: u64 },
}

impl PipelineError {
    /// The stage whose failure domain this error belongs to.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Classification { .. } => PipelineStage::Classification,
            Self::Resolution { .. } => PipelineStage::Resolution,
            Self::Validation(_) => PipelineStage::StrategySelection,
            Self::UnmappedAction { .. }
            | Self::DependencyCycle { .. }
            | Self::ParameterBinding { .. } => PipelineStage::Planning,
            Self::ExternalTool { .. } => PipelineStage::Execution,
            Self::Timeout { stage, .. } => *stage,
        }
    }
}

fn format_resolution_errors(errors: &[ResolutionError]) -> String {
    if errors.is_empty() {
        return "required reference left unresolved".to_string();
    }
    errors.iter().map(ResolutionError::code).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::{PipelineError, PipelineStage, ResolutionError, ValidationError};

    #[test]
    fn resolution_errors_expose_stable_codes() {
        let error = ResolutionError::NoOrdersFound { reference: "my last order".to_string() };
        assert_eq!(error.code(), "no_orders_found");
        assert_eq!(error.reference(), "my last order");

        let ambiguous =
            ResolutionError::AmbiguousReference { reference: "order".to_string(), candidates: 3 };
        assert_eq!(ambiguous.code(), "ambiguous_reference");
        assert!(ambiguous.to_string().contains("3 candidates"));
    }

    #[test]
    fn pipeline_errors_carry_their_originating_stage() {
        let classification = PipelineError::Classification { detail: "not json".to_string() };
        assert_eq!(classification.stage(), PipelineStage::Classification);

        let binding = PipelineError::ParameterBinding {
            action: "issue_gift_card".to_string(),
            key: "amount".to_string(),
        };
        assert_eq!(binding.stage(), PipelineStage::Planning);

        let timeout = PipelineError::Timeout { stage: PipelineStage::Resolution, timeout_secs: 5 };
        assert_eq!(timeout.stage(), PipelineStage::Resolution);
    }

    #[test]
    fn resolution_failure_message_lists_error_codes() {
        let error = PipelineError::Resolution {
            errors: vec![
                ResolutionError::NoOrdersFound { reference: "my last order".to_string() },
                ResolutionError::CustomerNotFound { reference: "my account".to_string() },
            ],
        };
        let message = error.to_string();
        assert!(message.contains("no_orders_found"));
        assert!(message.contains("customer_not_found"));
    }

    #[test]
    fn validation_error_names_strategy_and_field() {
        let error = ValidationError::MissingField {
            strategy_id: "standard_change".to_string(),
            field: "conditions",
        };
        assert!(error.to_string().contains("standard_change"));
        assert!(error.to_string().contains("conditions"));
    }
}
