//! Basic strategy: a single transcode configured directly from the preset.

use super::{run_plan, resolve_spec, CompressionResult, EncodePlan, StrategyContext};
use crate::errors::CompressionError;
use crate::ffmpeg::PassMode;

/// Single invocation, preset settings only; advanced overrides are ignored
/// by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicStrategy;

impl BasicStrategy {
    pub async fn execute(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<CompressionResult, CompressionError> {
        let spec = resolve_spec(ctx, None, PassMode::Single);
        run_plan(ctx, EncodePlan::Single(spec)).await
    }
}
