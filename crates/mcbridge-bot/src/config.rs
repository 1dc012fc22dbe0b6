//! Bot configuration: TOML file + CLI overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub console: ConsoleSection,
}

/// `[bot]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BotSection {
    #[serde(default = "default_control_char")]
    pub control_char: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Channel id the console posts into.
    #[serde(default = "default_console_id")]
    pub channel: String,
    /// Tenant id the console belongs to.
    #[serde(default = "default_console_id")]
    pub guild: String,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            control_char: default_control_char(),
            state_file: default_state_file(),
            channel: default_console_id(),
            guild: default_console_id(),
        }
    }
}

/// `[console]` section: who is typing at the terminal.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleSection {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Grant the console user everything under the bridge root.
    #[serde(default)]
    pub admin: bool,
}

impl Default for ConsoleSection {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            user_name: default_user_name(),
            roles: Vec::new(),
            admin: false,
        }
    }
}

fn default_control_char() -> String {
    "!".to_string()
}
fn default_state_file() -> String {
    "~/.mcbridge/state.json".to_string()
}
fn default_console_id() -> String {
    "console".to_string()
}
fn default_user_id() -> String {
    "console".to_string()
}
fn default_user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "operator".into())
}

/// Resolved bot configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub control_char: String,
    pub state_path: PathBuf,
    pub channel: String,
    pub guild: String,
    pub console: ConsoleSection,
}

impl BotConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_state_file: Option<&str>,
        cli_control_char: Option<&str>,
        cli_admin: bool,
    ) -> Result<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)
                        .with_context(|| format!("failed to read config at {}", expanded.display()))?;
                    toml::from_str::<ConfigFile>(&content)
                        .with_context(|| format!("failed to parse config at {}", expanded.display()))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let control_char = cli_control_char
            .map(str::to_string)
            .unwrap_or(file_config.bot.control_char);
        if control_char.is_empty() {
            anyhow::bail!("control_char must not be empty");
        }
        let state_file = cli_state_file
            .map(str::to_string)
            .unwrap_or(file_config.bot.state_file);

        let mut console = file_config.console;
        console.admin |= cli_admin;

        Ok(Self {
            control_char,
            state_path: expand_tilde_str(&state_file),
            channel: file_config.bot.channel,
            guild: file_config.bot.guild,
            console,
        })
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

pub fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
