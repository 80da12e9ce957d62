use axum::{
    body::{Body, to_bytes},
    extract::{Path, Request, State},
    http::header,
    response::Response,
};
use tower::ServiceExt;

use common::error::ApiError;

use crate::core::routes::MAX_BODY_BYTES;
use crate::core::state::ControlState;

// ANY /proxy/{node_id}/{*rest}
/// Relay a request to the addressed node's native API. Requests to the
/// local node are dispatched in-process through the assembled router and
/// never touch the network; everything else goes through the proxy, which
/// relays the peer's status and body unmodified.
#[tracing::instrument(name = "fleet.proxy", skip(ctx, req), fields(target = %node_id, path = %rest))]
pub async fn proxy_request(
    Path((node_id, rest)): Path<(String, String)>,
    State(ctx): State<ControlState>,
    req: Request,
) -> Result<Response, ApiError> {
    let node = ctx.registry.get(&node_id)?.ok_or(ApiError::NodeNotFound)?;

    let query = req
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let path_and_query = format!("/{}{}", rest, query);

    if node.is_self {
        let router = ctx
            .local_router()
            .ok_or_else(|| ApiError::Any(anyhow::anyhow!("local router not initialized")))?;

        let (mut parts, body) = req.into_parts();
        parts.uri = path_and_query
            .parse()
            .map_err(|e| ApiError::Validation(format!("proxied path: {}", e)))?;
        let local = Request::from_parts(parts, body);

        return match router.oneshot(local).await {
            Ok(resp) => Ok(resp),
            Err(never) => match never {},
        };
    }

    let (parts, body) = req.into_parts();
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::Validation(format!("request body: {}", e)))?;
    let body = if bytes.is_empty() { None } else { Some(bytes) };

    let relayed = ctx
        .proxy
        .forward(
            &node_id,
            parts.method,
            &path_and_query,
            body,
            bearer.as_deref(),
        )
        .await?;

    let mut builder = Response::builder().status(relayed.status.as_u16());
    if let Some(ct) = &relayed.content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    builder
        .body(Body::from(relayed.body))
        .map_err(|e| ApiError::Any(anyhow::anyhow!("assembling relayed response: {}", e)))
}
