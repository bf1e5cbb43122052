use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, PipelineError};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub notion_api_key: String,
    pub notion_version: String,
    pub google_api_key: String,
    pub gemini_model: String,
    pub host: String,
    pub port: u16,
    pub search: SearchConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok(); // Load .env file if present
        Ok(AppConfig {
            notion_api_key: get_env("NOTION_API_KEY")?,
            notion_version: get_env_or_default("NOTION_VERSION", "2022-06-28"),
            google_api_key: get_env("GOOGLE_API_KEY")?,
            gemini_model: get_env_or_default("GEMINI_MODEL", "gemini-1.5-flash"),
            host: get_env_or_default("HOST", "127.0.0.1"),
            port: parse_env_or("PORT", 3000)?,
            search: SearchConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub max_keywords: usize,
    pub max_results: usize,
    pub max_selected_pages: usize,
    // Top-level pages are depth 1.
    pub max_depth: u32,
    pub search_delay: Duration,
    pub query_suffixes: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_keywords: 3,
            max_results: 30,
            max_selected_pages: 3,
            max_depth: 3,
            search_delay: Duration::from_millis(350),
            query_suffixes: vec!["project".to_string(), "plan".to_string()],
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let delay_ms = parse_env_or(
            "SCOUT_SEARCH_DELAY_MS",
            defaults.search_delay.as_millis() as u64,
        )?;
        Ok(Self {
            max_keywords: parse_env_or("SCOUT_MAX_KEYWORDS", defaults.max_keywords)?,
            max_results: parse_env_or("SCOUT_MAX_RESULTS", defaults.max_results)?,
            max_selected_pages: parse_env_or(
                "SCOUT_MAX_SELECTED_PAGES",
                defaults.max_selected_pages,
            )?,
            max_depth: parse_env_or("SCOUT_MAX_DEPTH", defaults.max_depth)?,
            search_delay: Duration::from_millis(delay_ms),
            query_suffixes: defaults.query_suffixes,
        })
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_keywords == 0 {
            return Err(PipelineError::Config(
                "max_keywords must be greater than 0".into(),
            ));
        }
        if self.max_results == 0 {
            return Err(PipelineError::Config(
                "max_results must be greater than 0".into(),
            ));
        }
        if self.max_selected_pages == 0 {
            return Err(PipelineError::Config(
                "max_selected_pages must be greater than 0".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(PipelineError::Config(
                "max_depth must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn get_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key.to_string()))
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
