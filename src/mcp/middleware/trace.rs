use async_trait::async_trait;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{Invocation, Next, Stage, StageResult};
use crate::mcp::context::RequestContext;
use crate::mcp::error::ErrorCode;

/// Innermost stage. Wraps the handler call in a span and logs the outcome
/// with its elapsed time.
pub struct TracingStage;

#[async_trait]
impl Stage for TracingStage {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn handle(&self, ctx: &mut RequestContext, invocation: &Invocation, next: Next<'_>) -> StageResult {
        let span = info_span!(
            "invocation",
            request_id = %ctx.request_id,
            capability = %invocation.descriptor.name,
            identity = %ctx.identity,
        );
        debug!(parent: &span, "Invocation started");

        let started = tokio::time::Instant::now();
        let result = next.run(ctx, invocation).instrument(span.clone()).await;
        let elapsed = started.elapsed();
        ctx.record("elapsed_ms", elapsed.as_millis().to_string());

        match &result {
            Ok(_) => {
                info!(parent: &span, elapsed_ms = elapsed.as_millis() as u64, "Invocation succeeded");
            }
            Err(err) => {
                let code = err.code();
                match code {
                    ErrorCode::InternalError => {
                        error!(parent: &span, elapsed_ms = elapsed.as_millis() as u64, code = %code, "Invocation failed: {}", err)
                    }
                    _ => {
                        warn!(parent: &span, elapsed_ms = elapsed.as_millis() as u64, code = %code, "Invocation failed: {}", err)
                    }
                }
            }
        }

        result
    }
}
