//! `POST /v1/chat/completions`
//!
//! Non-streaming requests get one `chat.completion` JSON body. Streaming
//! requests get SSE: live status events while the session runs, then a role
//! chunk, a content chunk with `finish_reason: "stop"`, and `[DONE]`.
//! Dropping the SSE connection cancels the session.

use super::types::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, ChunkDelta, RlmMetadata,
};
use super::{ApiError, AppState};
use crate::config::RuntimeConfig;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::stream::{self, StreamExt};
use orchestration::{
    EscalationPolicy, ModelSpec, OrchestratorError, RecursiveSession, RunControl, SessionResult,
    StatusEvent, StatusSink,
};
use std::convert::Infallible;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// `ROLE: content` per message, newline separated
pub fn build_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pick the starting model and ladder for a requested model id.
///
/// The alias (or a blank id) starts at the bottom rung; a ladder model
/// starts at its own rung; anything else runs alone on a one-rung ladder.
/// Temperature and token overrides apply to the starting model only.
pub fn resolve_start(
    config: &RuntimeConfig,
    request: &ChatCompletionRequest,
) -> Result<(ModelSpec, EscalationPolicy), ApiError> {
    let requested = request.model.trim();
    let policy = config.policy().map_err(|e| ApiError::Internal(e.to_string()))?;

    let (mut initial, policy) = if requested.is_empty() || requested == config.server.model_alias {
        (policy.ladder()[0].clone(), policy)
    } else if let Ok(index) = policy.position(requested) {
        (policy.ladder()[index].clone(), policy)
    } else {
        let single = ModelSpec::new(requested);
        let policy = EscalationPolicy::new(config.orchestration.max_attempts, vec![single.clone()])
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        (single, policy)
    };

    if let Some(temperature) = request.temperature {
        initial.temperature = Some(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        initial.max_tokens = Some(max_tokens);
    }
    Ok((initial, policy))
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest(
            "Invalid request: messages are required".into(),
        ));
    }

    let prompt = build_prompt(&request.messages);
    let (initial, policy) = resolve_start(&state.config, &request)?;
    let echo_model = if request.model.trim().is_empty() {
        state.config.server.model_alias.clone()
    } else {
        request.model.clone()
    };

    info!(
        requested = %request.model,
        model = %initial.name,
        messages = request.messages.len(),
        stream = request.stream,
        "chat.completion.start"
    );

    let options = state
        .config
        .session_options(initial, policy, state.grounding.clone());
    let frame = Frame {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        created: chrono::Utc::now().timestamp(),
        model: echo_model,
    };

    if !request.stream {
        let started = Instant::now();
        let session = RecursiveSession::new(state.backend.clone(), options);
        let result = session.run(&prompt, &[]).await?;
        info!(
            model = %result.model,
            attempts = result.attempts,
            confidence = result.confidence,
            latency_ms = started.elapsed().as_millis() as u64,
            "chat.completion.success"
        );
        return Ok(Json(frame.completion(result)).into_response());
    }

    let (tx, rx) = mpsc::unbounded_channel::<StreamItem>();
    let token = CancellationToken::new();
    let status_tx = tx.clone();
    let sink = StatusSink::new(move |event| {
        let _ = status_tx.send(StreamItem::Status(event));
    });
    let control = RunControl::default()
        .with_status(sink)
        .with_cancellation(token.clone());
    let session = RecursiveSession::new(state.backend.clone(), options).with_control(control);

    tokio::spawn(async move {
        let outcome = session.run(&prompt, &[]).await;
        if let Ok(result) = &outcome {
            info!(
                model = %result.model,
                attempts = result.attempts,
                confidence = result.confidence,
                "chat.completion.stream.success"
            );
        }
        let _ = tx.send(StreamItem::Finished(Box::new(outcome)));
    });

    // The guard rides inside the stream state so a dropped client cancels the run
    let guard = token.drop_guard();
    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|item| (item, (rx, guard)))
    })
    .flat_map(move |item| stream::iter(frame.events(item)));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

enum StreamItem {
    Status(StatusEvent),
    Finished(Box<Result<SessionResult, OrchestratorError>>),
}

/// Identity shared by every chunk of one completion
struct Frame {
    id: String,
    created: i64,
    model: String,
}

impl Frame {
    fn completion(&self, result: SessionResult) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: result.content,
                },
                finish_reason: "stop".to_string(),
            }],
            rlm: RlmMetadata {
                model: result.model,
                confidence: result.confidence,
                attempts: result.attempts,
                revised: result.revised,
                outcome: result.loop_outcome.to_string(),
            },
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish: Option<&str>) -> Event {
        let chunk = ChatCompletionChunk::new(&self.id, self.created, &self.model, delta, finish);
        Event::default().data(serde_json::to_string(&chunk).unwrap_or_default())
    }

    fn events(&self, item: StreamItem) -> Vec<Result<Event, Infallible>> {
        match item {
            StreamItem::Status(event) => {
                vec![Ok(Event::default().data(serde_json::to_string(&event).unwrap_or_default()))]
            }
            StreamItem::Finished(outcome) => match *outcome {
                Ok(result) => vec![
                    Ok(self.chunk(
                        ChunkDelta {
                            role: Some("assistant".to_string()),
                            content: None,
                        },
                        None,
                    )),
                    Ok(self.chunk(
                        ChunkDelta {
                            role: None,
                            content: Some(result.content),
                        },
                        Some("stop"),
                    )),
                    Ok(Event::default().data("[DONE]")),
                ],
                Err(err) => {
                    let envelope = ApiError::from(err).envelope();
                    vec![Ok(Event::default()
                        .event("error")
                        .data(serde_json::to_string(&envelope).unwrap_or_default()))]
                }
            },
        }
    }
}
