//! Invocation orchestration for one-shot backends.
//!
//! One tool call becomes a bounded sequence of subprocess attempts that all
//! draw from a single deadline. Every failure is folded into a
//! [`ToolResponse`]; nothing here propagates an error to the protocol layer.

use crate::backend::{BackendConfig, ResolvedOptions};
use crate::normalize::normalize;
use crate::process::{self, MAX_OUTPUT_BYTES, RunOptions};

use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const PROMPT_ARGUMENT: &str = "prompt";
const TIMEOUT_ARGUMENT: &str = "timeout_ms";

/// Result of one tool call as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// A parsed tool call for the served backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub tool_name: String,
    pub prompt: Option<String>,
    /// Request-supplied budget; `None` falls back to the startup default.
    pub timeout_ms: Option<u64>,
    pub options: ResolvedOptions,
    /// Argument keys nobody recognizes. Accepted, logged, never forwarded.
    pub ignored_keys: Vec<String>,
}

impl InvocationRequest {
    /// Parse raw tool arguments against the backend's recognized options.
    pub fn from_arguments(backend: &BackendConfig, arguments: &Map<String, Value>) -> Self {
        let prompt = arguments
            .get(PROMPT_ARGUMENT)
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let timeout_ms = match arguments.get(TIMEOUT_ARGUMENT) {
            None | Some(Value::Null) => None,
            Some(value) => {
                let parsed = value.as_u64();
                if parsed.is_none() {
                    tracing::debug!(%value, "timeout_ms is not a non-negative integer, using default");
                }
                parsed
            }
        };

        let recognized = backend.recognized_options();
        let mut options = ResolvedOptions::default();
        for option in &recognized {
            let value = match arguments.get(option.name) {
                Some(raw) => option.coerce(raw).unwrap_or_else(|| {
                    tracing::warn!(option = option.name, value = %raw, "option has the wrong type, using default");
                    option.default
                }),
                None => option.default,
            };
            options.set(option.name, value);
        }

        let ignored_keys = arguments
            .keys()
            .filter(|key| {
                key.as_str() != PROMPT_ARGUMENT
                    && key.as_str() != TIMEOUT_ARGUMENT
                    && !recognized.iter().any(|option| option.name == key.as_str())
            })
            .cloned()
            .collect();

        Self {
            tool_name: backend.tool_name().to_string(),
            prompt,
            timeout_ms,
            options,
            ignored_keys,
        }
    }
}

/// Runs tool calls against one backend.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    backend: BackendConfig,
    default_timeout: Duration,
    max_output_bytes: usize,
}

impl Orchestrator {
    pub fn new(backend: BackendConfig, default_timeout: Duration) -> Self {
        Self {
            backend,
            default_timeout,
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    /// Parse raw tool arguments and run them.
    pub async fn call(&self, arguments: &Map<String, Value>) -> ToolResponse {
        let request = InvocationRequest::from_arguments(&self.backend, arguments);
        self.invoke(request).await
    }

    /// Run one invocation to completion.
    pub async fn invoke(&self, request: InvocationRequest) -> ToolResponse {
        let invocation_id = Uuid::new_v4();
        let provider = self.backend.kind.provider();
        let command = self.backend.command.as_str();

        for key in &request.ignored_keys {
            tracing::info!(%invocation_id, %provider, key = %key, "ignoring unrecognized argument");
        }

        let Some(prompt) = request
            .prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
        else {
            tracing::warn!(%invocation_id, %provider, "rejected call without a prompt");
            return ToolResponse::error("prompt is required and must be a non-empty string");
        };

        let budget = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let budget_ms = budget.as_millis() as u64;
        let started = Instant::now();
        let deadline = started + budget;

        let args = self.backend.build_args(prompt, &request.options);
        let input = self.backend.stdin_payload(prompt);
        let max_attempts = self.backend.kind.empty_output_attempts().max(1);

        for attempt in 1..=max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    %invocation_id,
                    %provider,
                    attempt,
                    budget_ms,
                    "timeout budget exhausted before attempt could start"
                );
                return ToolResponse::error(format!(
                    "timeout budget of {budget_ms}ms exhausted before attempt {attempt} of '{command}' could start"
                ));
            }

            tracing::info!(
                %invocation_id,
                %provider,
                attempt,
                max_attempts,
                remaining_ms = remaining.as_millis() as u64,
                "running backend"
            );

            let mut options = RunOptions::new(remaining).with_max_output_bytes(self.max_output_bytes);
            if let Some(input) = &input {
                options = options.with_input(input.clone());
            }

            let result = match process::run(command, &args, options).await {
                Ok(result) => result,
                Err(error) => {
                    tracing::warn!(
                        %invocation_id,
                        %provider,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        timed_out = error.is_timeout(),
                        %error,
                        "backend invocation failed"
                    );
                    return ToolResponse::error(error.to_string());
                }
            };

            let normalized = normalize(self.backend.kind, &result.output);

            if normalized.is_error {
                tracing::warn!(%invocation_id, %provider, attempt, "backend reported an error result");
                if normalized.text.trim().is_empty() {
                    return ToolResponse::error(format!(
                        "'{command}' reported an error without a message"
                    ));
                }
                return ToolResponse::error(normalized.text);
            }

            if !normalized.text.trim().is_empty() {
                tracing::info!(
                    %invocation_id,
                    %provider,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    stdout_bytes = result.stdout_bytes,
                    stderr_bytes = result.stderr_bytes,
                    "backend answered"
                );
                return ToolResponse::success(normalized.text);
            }

            if attempt < max_attempts {
                tracing::warn!(
                    %invocation_id,
                    %provider,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    stdout_bytes = result.stdout_bytes,
                    stderr_bytes = result.stderr_bytes,
                    "empty output after a clean exit, retrying"
                );
            }
        }

        tracing::warn!(%invocation_id, %provider, max_attempts, "backend produced only empty output");
        ToolResponse::error(format!(
            "'{command}' produced empty output despite a clean exit ({max_attempts} attempt(s))"
        ))
    }
}
