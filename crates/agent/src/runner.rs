use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use concierge_core::domain::plan::{ExecutionPlan, Instruction};
use concierge_core::domain::strategy::StrategyId;
use concierge_core::errors::PipelineError;

use crate::tools::ToolEnvelope;

/// Dispatch surface of the external executor. Implementations route each
/// instruction to the agent named by `instruction.agent` and return the
/// tool's uniform envelope.
#[async_trait]
pub trait InstructionExecutor: Send + Sync {
    async fn dispatch(&self, instruction: &Instruction) -> Result<ToolEnvelope>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub strategy_id: StrategyId,
    pub completed: usize,
}

/// Drives an already-built plan instruction by instruction, in plan order.
///
/// A `success: false` envelope or a transport fault stops the run and
/// reports the failing instruction index together with how many earlier
/// instructions completed, so the caller can reason about partial
/// completion. Nothing here retries a mutating instruction; compensation
/// is the caller's decision.
pub struct PlanRunner<E> {
    executor: E,
}

impl<E> PlanRunner<E>
where
    E: InstructionExecutor,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn run(&self, plan: &ExecutionPlan) -> Result<RunReport, PipelineError> {
        for (index, instruction) in plan.agent_instructions.iter().enumerate() {
            let envelope = match self.executor.dispatch(instruction).await {
                Ok(envelope) => envelope,
                Err(error) => {
                    return Err(PipelineError::ExternalTool {
                        instruction_index: index,
                        completed: index,
                        message: error.to_string(),
                    });
                }
            };
            if !envelope.success {
                return Err(PipelineError::ExternalTool {
                    instruction_index: index,
                    completed: index,
                    message: envelope
                        .error
                        .unwrap_or_else(|| "tool reported failure".to_string()),
                });
            }
            info!(
                event_name = "runner.instruction_completed",
                strategy_id = %plan.strategy_id.0,
                action = %instruction.action,
                sequence_index = index,
                "plan instruction completed"
            );
        }

        Ok(RunReport { strategy_id: plan.strategy_id.clone(), completed: plan.len() })
    }
}
