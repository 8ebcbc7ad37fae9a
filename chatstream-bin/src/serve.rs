use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use chatstream_core::ChatError;
use chatstream_core::config::{Config, DEFAULT_API};
use chatstream_core::http_client::RequestCtx;
use chatstream_core::model::ChatRequestBody;
use chatstream_core::relay::Relay;

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let relay = Relay::from_cfg(&cfg.relay, &cfg.http)?;
    tracing::info!(model = %relay.model(), upstream = %cfg.relay.upstream_base, "relay configured");

    let app = Router::new()
        .route(DEFAULT_API, post(chat_handler))
        .with_state(Arc::new(relay));

    let listener = tokio::net::TcpListener::bind(&cfg.relay.bind).await?;
    tracing::info!("relay listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn chat_handler(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Response {
    let ctx = RequestCtx {
        request_id: headers.get("x-request-id").and_then(|v| v.to_str().ok()),
        conversation_id: headers.get("x-conversation-id").and_then(|v| v.to_str().ok()),
    };
    match relay.complete(&body.messages, &ctx).await {
        Ok(resp) => (resp.status, resp.headers, Body::from_stream(resp.body)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, kind = e.kind(), "relay request failed");
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

fn error_status(e: &ChatError) -> StatusCode {
    match e {
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ChatError::Status { code, .. } => {
            StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        ChatError::Unavailable { .. } | ChatError::EmptyBody => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
