use std::env;
use std::time::Duration;

use codestream_contracts::protocol::Settings;

pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:7001";
pub const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:7001";
pub const READ_TIMEOUT_MS_DEFAULT: u64 = 500;
const READ_TIMEOUT_MS_MIN: u64 = 50;
const READ_TIMEOUT_MS_MAX: u64 = 5_000;
pub const NUM_VARIANTS_DEFAULT: usize = 2;
const NUM_VARIANTS_MAX: usize = 8;

const GENERATE_CODE_PATH: &str = "/generate-code";
const SCREENSHOT_PATH: &str = "/api/screenshot";

/// Where the generation service lives and how the client talks to it.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub ws_base: String,
    pub http_base: String,
    pub read_timeout: Duration,
    pub num_variants: usize,
    pub settings: Settings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_base: DEFAULT_WS_URL.to_string(),
            http_base: DEFAULT_HTTP_URL.to_string(),
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS_DEFAULT),
            num_variants: NUM_VARIANTS_DEFAULT,
            settings: Settings::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let settings = Settings {
            open_ai_api_key: non_empty_env("OPENAI_API_KEY"),
            open_ai_base_url: non_empty_env("OPENAI_BASE_URL"),
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY"),
            screenshot_one_api_key: non_empty_env("SCREENSHOTONE_API_KEY"),
            ..Settings::default()
        };
        Self {
            ws_base: base_url(env::var("CODESTREAM_WS_URL").ok(), DEFAULT_WS_URL),
            http_base: base_url(env::var("CODESTREAM_HTTP_URL").ok(), DEFAULT_HTTP_URL),
            read_timeout: Duration::from_millis(read_timeout_ms(
                env::var("CODESTREAM_READ_TIMEOUT_MS").ok(),
            )),
            num_variants: num_variants(env::var("CODESTREAM_NUM_VARIANTS").ok()),
            settings,
        }
    }

    pub fn generate_code_url(&self) -> String {
        format!("{}{GENERATE_CODE_PATH}", self.ws_base)
    }

    pub fn screenshot_url(&self) -> String {
        format!("{}{SCREENSHOT_PATH}", self.http_base)
    }
}

fn base_url(raw: Option<String>, default: &str) -> String {
    raw.map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn read_timeout_ms(raw: Option<String>) -> u64 {
    raw.and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(|value| value.clamp(READ_TIMEOUT_MS_MIN, READ_TIMEOUT_MS_MAX))
        .unwrap_or(READ_TIMEOUT_MS_DEFAULT)
}

fn num_variants(raw: Option<String>) -> usize {
    raw.and_then(|raw| raw.trim().parse::<usize>().ok())
        .map(|value| value.clamp(1, NUM_VARIANTS_MAX))
        .unwrap_or(NUM_VARIANTS_DEFAULT)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{base_url, num_variants, read_timeout_ms, EngineConfig};

    #[test]
    fn urls_are_trimmed_and_joined() {
        let config = EngineConfig {
            ws_base: base_url(Some(" wss://codegen.example.com/ ".to_string()), "x"),
            http_base: base_url(Some(String::new()), "http://127.0.0.1:7001"),
            ..EngineConfig::default()
        };
        assert_eq!(
            config.generate_code_url(),
            "wss://codegen.example.com/generate-code"
        );
        assert_eq!(
            config.screenshot_url(),
            "http://127.0.0.1:7001/api/screenshot"
        );
    }

    #[test]
    fn numeric_settings_are_clamped() {
        assert_eq!(read_timeout_ms(None), 500);
        assert_eq!(read_timeout_ms(Some("10".to_string())), 50);
        assert_eq!(read_timeout_ms(Some(" 750 ".to_string())), 750);
        assert_eq!(read_timeout_ms(Some("99999".to_string())), 5_000);
        assert_eq!(read_timeout_ms(Some("soon".to_string())), 500);

        assert_eq!(num_variants(None), 2);
        assert_eq!(num_variants(Some("0".to_string())), 1);
        assert_eq!(num_variants(Some("4".to_string())), 4);
        assert_eq!(num_variants(Some("64".to_string())), 8);
    }
}
