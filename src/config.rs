//! Configuration parsing and validation.
//!
//! Draft Harness is configured with a TOML file (default
//! `config/draft.toml`). Every section except `[db]` is optional and falls
//! back to the defaults below. After parsing, environment overrides are
//! applied and the result is validated.
//!
//! ```toml
//! [db]
//! path = "./data/draft.sqlite"
//!
//! [prompt]
//! max_chars = 32000
//!
//! [clarification]
//! max_turns = 3
//! min_items = 3
//!
//! [agent]
//! default_provider = "claude"
//! timeout_secs = 300
//!
//! [agent.providers.claude]
//! command = "claude"
//! model = "sonnet"
//!
//! [notion]
//! token_env = "NOTION_TOKEN"
//!
//! [git]
//! cache_dir = "./data/.git-cache"
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `PROMPT_MAX_CHARS` | `prompt.max_chars` |
//! | `CLAUDE_COMMAND`, `CLAUDE_MODEL` | command/model of the `claude` provider |
//! | `CODEX_COMMAND`, `CODEX_MODEL` | command/model of the `codex` provider |
//! | `GEMINI_COMMAND`, `GEMINI_MODEL` | command/model of the `gemini` provider |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use draft_harness_core::clarify::{DEFAULT_MAX_TURNS, DEFAULT_MIN_ITEMS};
use draft_harness_core::prompt::DEFAULT_PROMPT_MAX_CHARS;

/// Name of the always-available deterministic provider.
pub const MOCK_PROVIDER: &str = "mock";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub clarification: ClarificationConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_prompt_max_chars")]
    pub max_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_PROMPT_MAX_CHARS,
        }
    }
}

fn default_prompt_max_chars() -> usize {
    DEFAULT_PROMPT_MAX_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClarificationConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_min_items")]
    pub min_items: usize,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            min_items: DEFAULT_MIN_ITEMS,
        }
    }
}

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}
fn default_min_items() -> usize {
    DEFAULT_MIN_ITEMS
}

/// How a provider CLI receives the prompt.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptVia {
    #[default]
    Stdin,
    /// Appended as the final argument.
    Argument,
}

/// Command-line shape of one subprocess provider.
///
/// The command line is `command args.. [model_args..] [prompt]`, where every
/// `{model}` in `model_args` is replaced by `model` and `model_args` is
/// skipped when no model is set.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub command: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_model_args")]
    pub model_args: Vec<String>,
    #[serde(default)]
    pub prompt_via: PromptVia,
}

fn default_model_args() -> Vec<String> {
    vec!["--model".to_string(), "{model}".to_string()]
}

impl ProviderConfig {
    /// Arguments passed to `command`, excluding the prompt.
    pub fn base_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        // Model flags go before a trailing "-" stdin marker.
        let (head, tail) = match self.args.split_last() {
            Some((last, head)) if last == "-" => (head, std::slice::from_ref(last)),
            _ => (self.args.as_slice(), &[][..]),
        };
        out.extend(head.iter().cloned());
        if let Some(model) = self.model.as_deref().filter(|m| !m.trim().is_empty()) {
            out.extend(self.model_args.iter().map(|a| a.replace("{model}", model)));
        }
        out.extend(tail.iter().cloned());
        out
    }
}

/// Built-in provider table, used for any provider the TOML does not define.
pub fn builtin_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "claude".to_string(),
        ProviderConfig {
            command: "claude".to_string(),
            model: None,
            args: vec!["-p".to_string()],
            model_args: default_model_args(),
            prompt_via: PromptVia::Stdin,
        },
    );
    providers.insert(
        "codex".to_string(),
        ProviderConfig {
            command: "codex".to_string(),
            model: None,
            args: vec!["exec".to_string(), "-".to_string()],
            model_args: default_model_args(),
            prompt_via: PromptVia::Stdin,
        },
    );
    providers.insert(
        "gemini".to_string(),
        ProviderConfig {
            command: "gemini".to_string(),
            model: None,
            args: vec![],
            model_args: default_model_args(),
            prompt_via: PromptVia::Argument,
        },
    );
    providers
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            timeout_secs: default_timeout_secs(),
            providers: BTreeMap::new(),
        }
    }
}

fn default_provider() -> String {
    MOCK_PROVIDER.to_string()
}
fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotionConfig {
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_notion_api_base")]
    pub api_base: String,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_base: default_notion_api_base(),
        }
    }
}

fn default_token_env() -> String {
    "NOTION_TOKEN".to_string()
}
fn default_notion_api_base() -> String {
    "https://api.notion.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GitConfig {
    /// Clone cache for remote repositories. Defaults to `.git-cache` next to
    /// the database file.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Minimal in-code configuration, used by tests and `Config::from_toml`.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self {
            db: DbConfig { path: path.into() },
            prompt: PromptConfig::default(),
            clarification: ClarificationConfig::default(),
            agent: AgentConfig::default(),
            notion: NotionConfig::default(),
            git: GitConfig::default(),
        };
        config.fill_builtin_providers();
        config
    }

    /// Parse and validate a TOML document without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.fill_builtin_providers();
        config.validate()?;
        Ok(config)
    }

    /// Directory used to cache clones of remote git sources.
    pub fn git_cache_dir(&self) -> PathBuf {
        match &self.git.cache_dir {
            Some(dir) => dir.clone(),
            None => self
                .db
                .path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(".git-cache"),
        }
    }

    fn fill_builtin_providers(&mut self) {
        for (name, provider) in builtin_providers() {
            self.agent.providers.entry(name).or_insert(provider);
        }
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`load_config`]).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("PROMPT_MAX_CHARS") {
            self.prompt.max_chars = raw
                .trim()
                .parse()
                .with_context(|| format!("PROMPT_MAX_CHARS must be a positive integer, got '{}'", raw))?;
        }
        for (name, provider) in self.agent.providers.iter_mut() {
            let prefix = name.to_uppercase().replace('-', "_");
            if let Some(command) = lookup(&format!("{}_COMMAND", prefix)).filter(|v| !v.trim().is_empty()) {
                provider.command = command;
            }
            if let Some(model) = lookup(&format!("{}_MODEL", prefix)) {
                provider.model = Some(model).filter(|m| !m.trim().is_empty());
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.prompt.max_chars == 0 {
            bail!("prompt.max_chars must be > 0");
        }
        if self.clarification.max_turns == 0 {
            bail!("clarification.max_turns must be >= 1");
        }
        if self.clarification.min_items == 0 {
            bail!("clarification.min_items must be >= 1");
        }
        if self.agent.timeout_secs == 0 {
            bail!("agent.timeout_secs must be > 0");
        }
        if self.agent.providers.contains_key(MOCK_PROVIDER) {
            bail!("agent.providers.mock is reserved for the built-in mock agent");
        }
        for (name, provider) in &self.agent.providers {
            if provider.command.trim().is_empty() {
                bail!("agent.providers.{}.command must not be empty", name);
            }
        }
        let default = &self.agent.default_provider;
        if default != MOCK_PROVIDER && !self.agent.providers.contains_key(default) {
            bail!(
                "Unknown agent.default_provider: '{}'. Must be mock or one of: {}",
                default,
                self.agent.providers.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        Ok(())
    }
}

/// Read, parse, override from the environment, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.fill_builtin_providers();
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
