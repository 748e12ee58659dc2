//! Backend registry: which CLI each provider wraps and how it is invoked.
//!
//! One-shot backends (`claude`, `gemini`) are spawned once per tool call and
//! differ structurally in how the prompt reaches them, so they are a closed
//! enum with per-case behavior rather than rows in a table. `codex` speaks MCP
//! itself and is only ever run as a pass-through session.

use crate::error::ConfigError;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Provider selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    Claude,
    Gemini,
    Codex,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Claude => write!(f, "claude"),
            Provider::Gemini => write!(f, "gemini"),
            Provider::Codex => write!(f, "codex"),
        }
    }
}

/// How the prompt reaches the backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery {
    Stdin,
    Argv,
}

/// Type of an extra tool parameter a backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Boolean,
}

impl OptionKind {
    pub fn json_type(self) -> &'static str {
        match self {
            OptionKind::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    Boolean(bool),
}

/// An extra tool parameter with its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOption {
    pub name: &'static str,
    pub kind: OptionKind,
    pub default: OptionValue,
    pub description: &'static str,
}

impl ToolOption {
    /// Coerce a request value to this option's type, if it has the right shape.
    pub fn coerce(&self, value: &serde_json::Value) -> Option<OptionValue> {
        match self.kind {
            OptionKind::Boolean => value.as_bool().map(OptionValue::Boolean),
        }
    }
}

/// Recognized options after applying request values over defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOptions {
    values: BTreeMap<&'static str, OptionValue>,
}

impl ResolvedOptions {
    pub fn set(&mut self, name: &'static str, value: OptionValue) {
        self.values.insert(name, value);
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(OptionValue::Boolean(true)))
    }
}

const SANDBOX_OPTION: &str = "sandbox";

/// One-shot backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Claude,
    Gemini,
}

impl BackendKind {
    pub fn provider(self) -> Provider {
        match self {
            BackendKind::Claude => Provider::Claude,
            BackendKind::Gemini => Provider::Gemini,
        }
    }

    pub fn default_command(self) -> &'static str {
        match self {
            BackendKind::Claude => "claude",
            BackendKind::Gemini => "gemini",
        }
    }

    pub fn tool_name(self) -> &'static str {
        match self {
            BackendKind::Claude => "claude_code",
            BackendKind::Gemini => "gemini",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            BackendKind::Claude => {
                "Ask Claude Code a question. Runs `claude` non-interactively in read-only plan mode and returns its answer."
            }
            BackendKind::Gemini => {
                "Ask Gemini a question. Runs `gemini` non-interactively and returns its answer."
            }
        }
    }

    pub fn prompt_delivery(self) -> PromptDelivery {
        match self {
            BackendKind::Claude => PromptDelivery::Stdin,
            BackendKind::Gemini => PromptDelivery::Argv,
        }
    }

    /// Whether output is wrapped in a JSON result envelope.
    pub fn has_envelope(self) -> bool {
        matches!(self, BackendKind::Claude)
    }

    /// Attempts allowed when a clean exit produces blank output.
    ///
    /// `claude -p` occasionally exits 0 with nothing on stdout; a second run
    /// almost always answers.
    pub fn empty_output_attempts(self) -> u32 {
        match self {
            BackendKind::Claude => 2,
            BackendKind::Gemini => 1,
        }
    }
}

/// Immutable startup configuration for the one-shot backend being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Executable to spawn.
    pub command: String,
    /// Model override passed on every invocation.
    pub model: Option<String>,
    /// Default for the `sandbox` option when a request omits it.
    pub sandbox_default: bool,
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            command: kind.default_command().to_string(),
            model: None,
            sandbox_default: false,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_sandbox_default(mut self, sandbox: bool) -> Self {
        self.sandbox_default = sandbox;
        self
    }

    pub fn tool_name(&self) -> &'static str {
        self.kind.tool_name()
    }

    /// Extra tool parameters this backend understands, with their defaults.
    pub fn recognized_options(&self) -> Vec<ToolOption> {
        match self.kind {
            BackendKind::Claude => Vec::new(),
            BackendKind::Gemini => vec![ToolOption {
                name: SANDBOX_OPTION,
                kind: OptionKind::Boolean,
                default: OptionValue::Boolean(self.sandbox_default),
                description: "Run gemini in sandbox mode (-s)",
            }],
        }
    }

    /// Argument list for one invocation. The prompt is only included when it
    /// is delivered via argv.
    pub fn build_args(&self, prompt: &str, options: &ResolvedOptions) -> Vec<String> {
        let mut args = Vec::new();

        match self.kind {
            BackendKind::Claude => {
                // claude -p --output-format json --permission-mode plan --no-session-persistence [--model <m>] < prompt
                args.push("-p".to_string());
                args.push("--output-format".to_string());
                args.push("json".to_string());
                args.push("--permission-mode".to_string());
                args.push("plan".to_string());
                args.push("--no-session-persistence".to_string());
                if let Some(model) = &self.model {
                    args.push("--model".to_string());
                    args.push(model.clone());
                }
            }
            BackendKind::Gemini => {
                // gemini [-m <model>] [-s] -p <prompt>
                if let Some(model) = &self.model {
                    args.push("-m".to_string());
                    args.push(model.clone());
                }
                if options.flag(SANDBOX_OPTION) {
                    args.push("-s".to_string());
                }
                args.push("-p".to_string());
                args.push(prompt.to_string());
            }
        }

        args
    }

    /// Stdin payload for one invocation, present only for stdin delivery.
    pub fn stdin_payload(&self, prompt: &str) -> Option<String> {
        match self.kind.prompt_delivery() {
            PromptDelivery::Stdin => Some(prompt.to_string()),
            PromptDelivery::Argv => None,
        }
    }
}

/// Reasoning effort passed to codex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            _ => Err(ConfigError::UnknownReasoningEffort(value.to_string())),
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup configuration for the codex pass-through session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughConfig {
    pub command: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            command: "codex".to_string(),
            model: None,
            reasoning_effort: None,
        }
    }
}

impl PassthroughConfig {
    /// `codex -c ... mcp-server`. The sandbox and approval overrides are
    /// always present and never caller-configurable.
    pub fn build_args(&self) -> Vec<String> {
        let mut overrides = Vec::new();
        if let Some(model) = &self.model {
            overrides.push(format!("model={}", toml_string(model)));
        }
        if let Some(effort) = self.reasoning_effort {
            overrides.push(format!("model_reasoning_effort={}", toml_string(effort.as_str())));
        }
        overrides.push(format!("sandbox_mode={}", toml_string("read-only")));
        overrides.push(format!("approval_policy={}", toml_string("never")));

        let mut args = Vec::with_capacity(overrides.len() * 2 + 1);
        for value in overrides {
            args.push("-c".to_string());
            args.push(value);
        }
        args.push("mcp-server".to_string());
        args
    }
}

/// Quote a value as a TOML basic string (JSON string escaping is a subset).
fn toml_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// What the process serves for the selected provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Tools(BackendConfig),
    Passthrough(PassthroughConfig),
}
