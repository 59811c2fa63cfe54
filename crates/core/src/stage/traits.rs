//! The pipeline stage contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressReporter;
use super::types::{StageDescriptor, StageOutcome};
use crate::orchestrator::{PipelineContext, StageContext};

/// One unit of pipeline work.
///
/// The orchestrator sequences stages only through this trait. A stage must
/// check `cancel` at reasonable intervals and return [`StageOutcome::Canceled`]
/// once it fires.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Static identity and policy.
    fn descriptor(&self) -> &StageDescriptor;

    /// Run one attempt.
    ///
    /// Retries reuse the same `ctx`, so anything written to
    /// [`StageContext::scratch`] survives into the next attempt.
    async fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> StageOutcome;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Whether a resumed run may skip this stage.
    fn can_skip(&self, context: &PipelineContext) -> bool {
        self.descriptor().supports_resume && context.has_output(self.name())
    }

    /// Number of items handled, for telemetry.
    fn items_processed(&self, _context: &PipelineContext) -> u64 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageOutput;
    use serde_json::json;

    struct EchoStage {
        descriptor: StageDescriptor,
    }

    #[async_trait]
    impl PipelineStage for EchoStage {
        fn descriptor(&self) -> &StageDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            ctx: &mut StageContext<'_>,
            _progress: &dyn ProgressReporter,
            _cancel: &CancellationToken,
        ) -> StageOutcome {
            StageOutcome::success(ctx.input().clone())
        }
    }

    #[test]
    fn test_default_can_skip() {
        let stage = EchoStage {
            descriptor: StageDescriptor::new("script"),
        };
        let mut context = PipelineContext::new("job-1", json!({}));
        assert!(!stage.can_skip(&context));

        context.record_output("script", StageOutput::new(json!("draft")));
        assert!(stage.can_skip(&context));
        assert_eq!(stage.items_processed(&context), 1);
    }

    #[test]
    fn test_can_skip_respects_resume_flag() {
        let stage = EchoStage {
            descriptor: StageDescriptor::new("render").with_resume(false),
        };
        let mut context = PipelineContext::new("job-1", json!({}));
        context.record_output("render", StageOutput::new(json!(null)));
        assert!(!stage.can_skip(&context));
    }

    #[tokio::test]
    async fn test_execute_sees_input() {
        let stage = EchoStage {
            descriptor: StageDescriptor::new("script"),
        };
        let mut context = PipelineContext::new("job-1", json!({"brief": "cats"}));
        let mut ctx = context.stage_context("script", 1);

        let outcome = stage
            .execute(
                &mut ctx,
                &crate::stage::NoopReporter,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome, StageOutcome::success(json!({"brief": "cats"})));
    }
}
