//! Single-pass strategy: one transcode with advanced overrides applied.

use super::{run_plan, resolve_spec, CompressionResult, EncodePlan, StrategyContext};
use crate::errors::CompressionError;
use crate::ffmpeg::PassMode;

/// Single invocation; every numeric and quality knob is taken from the
/// advanced overrides when present, falling back to the preset. Also applies
/// the fast-start and optimize-for-web output flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinglePassStrategy;

impl SinglePassStrategy {
    pub async fn execute(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<CompressionResult, CompressionError> {
        let spec = resolve_spec(ctx, ctx.advanced, PassMode::Single);
        run_plan(ctx, EncodePlan::Single(spec)).await
    }
}
