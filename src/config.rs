//! Startup configuration.
//!
//! Resolved once from command-line flags before the protocol loop starts and
//! never re-read; everything downstream receives it by value or `Arc`.

use crate::backend::{
    BackendConfig, BackendKind, PassthroughConfig, Provider, ReasoningEffort, Selection,
};
use crate::error::{ConfigError, Result};

use std::path::PathBuf;
use std::time::Duration;

/// Default per-call timeout budget when a request does not supply one.
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;

/// mcp-agents configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which backend this process serves.
    pub provider: Provider,

    /// Default timeout budget in milliseconds.
    pub default_timeout_ms: u64,

    /// Default for gemini's `sandbox` option.
    pub sandbox: bool,

    /// Per-backend model overrides.
    pub models: ModelConfig,

    /// Reasoning effort for the codex pass-through session.
    pub codex_reasoning_effort: Option<ReasoningEffort>,

    /// Replacement executable for the selected provider.
    pub command: Option<String>,

    /// Directory for a daily-rolling log file, in addition to stderr.
    pub log_dir: Option<PathBuf>,

    /// Enable debug logging.
    pub debug: bool,
}

/// Model overrides, one per provider.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    pub claude: Option<String>,
    pub gemini: Option<String>,
    pub codex: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::Claude,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            sandbox: false,
            models: ModelConfig::default(),
            codex_reasoning_effort: None,
            command: None,
            log_dir: None,
            debug: false,
        }
    }
}

impl Config {
    /// Validate a configuration assembled from flags.
    pub fn validate(self) -> Result<Self> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("default timeout must be at least 1ms".into()).into());
        }

        if let Some(command) = &self.command
            && command.trim().is_empty()
        {
            return Err(ConfigError::Invalid("command override is empty".into()).into());
        }

        Ok(self)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Resolve the Backend Registry entry for the selected provider.
    pub fn selection(&self) -> Selection {
        let model = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|model| !model.is_empty())
                .map(ToString::to_string)
        };

        match self.provider {
            Provider::Claude => {
                Selection::Tools(self.one_shot(BackendKind::Claude, model(&self.models.claude)))
            }
            Provider::Gemini => {
                Selection::Tools(self.one_shot(BackendKind::Gemini, model(&self.models.gemini)))
            }
            Provider::Codex => {
                let mut passthrough = PassthroughConfig {
                    model: model(&self.models.codex),
                    reasoning_effort: self.codex_reasoning_effort,
                    ..PassthroughConfig::default()
                };
                if let Some(command) = &self.command {
                    passthrough.command = command.clone();
                }
                Selection::Passthrough(passthrough)
            }
        }
    }

    fn one_shot(&self, kind: BackendKind, model: Option<String>) -> BackendConfig {
        let mut backend = BackendConfig::new(kind)
            .with_model(model)
            .with_sandbox_default(self.sandbox);
        if let Some(command) = &self.command {
            backend = backend.with_command(command.clone());
        }
        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn rejects_zero_timeout() {
        let config = Config {
            default_timeout_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn rejects_blank_command_override() {
        let config = Config {
            command: Some("   ".into()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn gemini_selection_carries_sandbox_default_and_model() {
        let config = Config {
            provider: Provider::Gemini,
            sandbox: true,
            models: ModelConfig {
                gemini: Some("gemini-2.5-flash".into()),
                claude: Some("opus".into()),
                ..ModelConfig::default()
            },
            ..Config::default()
        };

        let Selection::Tools(backend) = config.selection() else {
            panic!("gemini is a one-shot backend");
        };
        assert_eq!(backend.kind, BackendKind::Gemini);
        assert_eq!(backend.command, "gemini");
        assert_eq!(backend.model.as_deref(), Some("gemini-2.5-flash"));
        assert!(backend.sandbox_default);
    }

    #[test]
    fn codex_selection_is_passthrough() {
        let config = Config {
            provider: Provider::Codex,
            codex_reasoning_effort: Some(ReasoningEffort::Low),
            command: Some("/opt/codex/bin/codex".into()),
            models: ModelConfig {
                codex: Some(" ".into()),
                ..ModelConfig::default()
            },
            ..Config::default()
        };

        let Selection::Passthrough(passthrough) = config.selection() else {
            panic!("codex runs as a pass-through session");
        };
        assert_eq!(passthrough.command, "/opt/codex/bin/codex");
        assert_eq!(passthrough.model, None);
        assert_eq!(passthrough.reasoning_effort, Some(ReasoningEffort::Low));
    }

    #[test]
    fn command_override_replaces_default_executable() {
        let config = Config {
            command: Some("/usr/local/bin/claude-wrapper".into()),
            ..Config::default()
        };
        let Selection::Tools(backend) = config.selection() else {
            panic!("claude is a one-shot backend");
        };
        assert_eq!(backend.command, "/usr/local/bin/claude-wrapper");
    }
}
