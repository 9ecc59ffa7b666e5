use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RENDER_DIR: &str = "_site";
pub const DEFAULT_CARD_WIDTH: u32 = 800;
pub const DEFAULT_CARD_HEIGHT: u32 = 418;
pub const DEFAULT_CARD_FILENAME: &str = "social-media-card.png";
pub const DEFAULT_CARD_COMMAND: &str = "shot-scraper";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_KEY_FILENAME: &str = ".geir";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BlogConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub card: CardSection,
    #[serde(default)]
    pub summarize: SummarizeSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub base_url: Option<String>,
    pub render_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CardSection {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub filename: Option<String>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SummarizeSection {
    pub ollama_url: Option<String>,
    pub openai_url: Option<String>,
    pub openai_key_file: Option<String>,
}

impl BlogConfig {
    /// Resolve the public site URL for log lines: env BLOG_SITE_URL > config > None.
    pub fn base_url(&self) -> Option<String> {
        if let Some(value) = non_empty_env("BLOG_SITE_URL") {
            return Some(value.trim_end_matches('/').to_string());
        }
        self.site
            .base_url
            .as_deref()
            .map(|value| value.trim_end_matches('/').to_string())
    }

    /// Name of the directory the static-site generator renders into.
    pub fn render_dir(&self) -> String {
        self.site
            .render_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_RENDER_DIR.to_string())
    }

    pub fn card_width(&self) -> u32 {
        self.card.width.unwrap_or(DEFAULT_CARD_WIDTH)
    }

    pub fn card_height(&self) -> u32 {
        self.card.height.unwrap_or(DEFAULT_CARD_HEIGHT)
    }

    pub fn card_filename(&self) -> String {
        self.card
            .filename
            .clone()
            .unwrap_or_else(|| DEFAULT_CARD_FILENAME.to_string())
    }

    /// Resolve the capture command: env BLOG_SHOT_SCRAPER > config > default.
    pub fn card_command(&self) -> String {
        if let Some(value) = non_empty_env("BLOG_SHOT_SCRAPER") {
            return value;
        }
        self.card
            .command
            .clone()
            .unwrap_or_else(|| DEFAULT_CARD_COMMAND.to_string())
    }

    pub fn ollama_url(&self) -> String {
        self.summarize
            .ollama_url
            .as_deref()
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
    }

    pub fn openai_url(&self) -> String {
        self.summarize
            .openai_url
            .as_deref()
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
    }

    /// Path of the key file consulted when OPENAI_API_KEY is not set.
    /// Defaults to `$HOME/.geir`.
    pub fn openai_key_file(&self) -> Option<String> {
        if let Some(path) = self.summarize.openai_key_file.clone() {
            return Some(path);
        }
        non_empty_env("HOME").map(|home| {
            format!(
                "{}/{}",
                home.trim_end_matches('/'),
                DEFAULT_OPENAI_KEY_FILENAME
            )
        })
    }
}

/// Load a BlogConfig from a TOML file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BlogConfig> {
    if !config_path.exists() {
        return Ok(BlogConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BlogConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_empty_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
