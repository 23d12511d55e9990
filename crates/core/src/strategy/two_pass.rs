//! Two-pass strategy: an analysis pass followed by the real encode.
//!
//! Pass 1 collects statistics and discards its output; pass 2 consumes them
//! for a more accurate bitrate target. Task progress is piecewise: pass 1
//! maps onto 0-50%, pass 2 onto 50-100%. The statistics artifacts are
//! deleted after pass 2 completes.

use super::{run_plan, resolve_spec, CompressionResult, EncodePlan, StrategyContext};
use crate::errors::CompressionError;
use crate::ffmpeg::PassMode;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TwoPassStrategy;

impl TwoPassStrategy {
    pub async fn execute(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<CompressionResult, CompressionError> {
        let passlog = ctx
            .output_directory
            .join(format!(".vidpress-pass-{}", Uuid::new_v4()));

        let analysis = resolve_spec(
            ctx,
            ctx.advanced,
            PassMode::Analysis {
                passlog: passlog.clone(),
            },
        );
        let encode = resolve_spec(
            ctx,
            ctx.advanced,
            PassMode::Encode {
                passlog: passlog.clone(),
            },
        );

        run_plan(
            ctx,
            EncodePlan::TwoPass {
                analysis,
                encode,
                passlog,
            },
        )
        .await
    }
}
