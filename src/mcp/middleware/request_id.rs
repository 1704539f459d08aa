use async_trait::async_trait;

use super::{Invocation, Next, Stage, StageResult};
use crate::mcp::context::RequestContext;

const MAX_CLIENT_REQUEST_ID_LEN: usize = 128;

/// Tags the context with its request id, and with the caller's own id when a
/// sane one was supplied.
pub struct RequestIdStage;

fn is_acceptable_client_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CLIENT_REQUEST_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[async_trait]
impl Stage for RequestIdStage {
    fn name(&self) -> &'static str {
        "request_id"
    }

    async fn handle(&self, ctx: &mut RequestContext, invocation: &Invocation, next: Next<'_>) -> StageResult {
        let request_id = ctx.request_id.clone();
        ctx.record("request_id", request_id);
        if let Some(client_id) = invocation.client_request_id.as_deref() {
            if is_acceptable_client_id(client_id) {
                ctx.record("client_request_id", client_id);
            }
        }
        next.run(ctx, invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_filter() {
        assert!(is_acceptable_client_id("abc-123_x.y"));
        assert!(!is_acceptable_client_id(""));
        assert!(!is_acceptable_client_id("has space"));
        assert!(!is_acceptable_client_id("line\nbreak"));
        assert!(!is_acceptable_client_id(&"a".repeat(129)));
    }
}
