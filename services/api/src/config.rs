use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub deepgram_api_key: String,
    pub groq_api_key: String,
    pub llm_api_base: String,
    pub chat_model: String,
    pub eleven_labs_api_key: Option<String>,
    pub eleven_labs_voice_id: String,
    pub eleven_labs_model: String,
    pub google_vision_api_key: Option<String>,
    pub joke_threshold: f32,
    pub max_response_length: usize,
    pub streaming_enabled: bool,
    pub conversation_mode: bool,
    pub keepalive_after_secs: u64,
    pub player_command: String,
    pub ytdlp_command: String,
    pub play_audio_locally: bool,
    pub prompts_path: Option<PathBuf>,
    pub log_level: Level,
}

fn required(var: &str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(var.to_string()))
}

fn optional(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn or_default(var: &str, default: &str) -> String {
    optional(var).unwrap_or_else(|| default.to_string())
}

fn parsed<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn flag(var: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(var) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                var.to_string(),
                format!("'{raw}' is not a boolean"),
            )),
        },
        None => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address: SocketAddr = parsed("BIND_ADDRESS", ([0, 0, 0, 0], 8000).into())?;

        let deepgram_api_key = required("DEEPGRAM_API_KEY")?;
        let groq_api_key = required("GROQ_API_KEY")?;
        let llm_api_base = or_default("LLM_API_BASE", "https://api.groq.com/openai/v1");
        let chat_model = or_default("CHAT_MODEL", "llama-3.1-8b-instant");

        let eleven_labs_api_key = optional("ELEVEN_LABS_API_KEY");
        let eleven_labs_voice_id = or_default("ELEVEN_LABS_VOICE_ID", "21m00Tcm4TlvDq8ikWAM");
        let eleven_labs_model = or_default("ELEVEN_LABS_MODEL", "eleven_turbo_v2_5");
        let google_vision_api_key = optional("GOOGLE_VISION_API_KEY");

        let joke_threshold: f32 = parsed("JOKE_THRESHOLD", 0.7)?;
        if !(0.0..=1.0).contains(&joke_threshold) {
            return Err(ConfigError::InvalidValue(
                "JOKE_THRESHOLD".to_string(),
                format!("{joke_threshold} is outside [0, 1]"),
            ));
        }
        let max_response_length: usize = parsed("MAX_RESPONSE_LENGTH", 200)?;

        let streaming_enabled = flag("STREAMING_ENABLED", true)?;
        let conversation_mode = flag("CONVERSATION_MODE", false)?;
        let keepalive_after_secs: u64 = parsed("KEEPALIVE_AFTER_SECS", 8)?;

        let player_command = or_default("PLAYER_COMMAND", "ffplay");
        let ytdlp_command = or_default("YTDLP_COMMAND", "yt-dlp");
        let play_audio_locally = flag("PLAY_AUDIO_LOCALLY", false)?;
        let prompts_path = optional("PROMPTS_PATH").map(PathBuf::from);

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            deepgram_api_key,
            groq_api_key,
            llm_api_base,
            chat_model,
            eleven_labs_api_key,
            eleven_labs_voice_id,
            eleven_labs_model,
            google_vision_api_key,
            joke_threshold,
            max_response_length,
            streaming_enabled,
            conversation_mode,
            keepalive_after_secs,
            player_command,
            ytdlp_command,
            play_audio_locally,
            prompts_path,
            log_level,
        })
    }
}

/// Masks a secret for logging, keeping only the first four characters.
pub fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}***")
}

#[cfg(test)]
impl Config {
    /// A fully-populated configuration that never touches the environment.
    pub(crate) fn for_tests() -> Self {
        Self {
            bind_address: ([127, 0, 0, 1], 0).into(),
            deepgram_api_key: "test-deepgram-key".to_string(),
            groq_api_key: "test-groq-key".to_string(),
            llm_api_base: "http://localhost:9/v1".to_string(),
            chat_model: "test-model".to_string(),
            eleven_labs_api_key: None,
            eleven_labs_voice_id: "test-voice".to_string(),
            eleven_labs_model: "test-tts-model".to_string(),
            google_vision_api_key: None,
            joke_threshold: 0.7,
            max_response_length: 200,
            streaming_enabled: true,
            conversation_mode: false,
            keepalive_after_secs: 8,
            player_command: "ffplay".to_string(),
            ytdlp_command: "yt-dlp".to_string(),
            play_audio_locally: false,
            prompts_path: None,
            log_level: Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    const ALL_VARS: &[&str] = &[
        "BIND_ADDRESS",
        "DEEPGRAM_API_KEY",
        "GROQ_API_KEY",
        "LLM_API_BASE",
        "CHAT_MODEL",
        "ELEVEN_LABS_API_KEY",
        "ELEVEN_LABS_VOICE_ID",
        "ELEVEN_LABS_MODEL",
        "GOOGLE_VISION_API_KEY",
        "JOKE_THRESHOLD",
        "MAX_RESPONSE_LENGTH",
        "STREAMING_ENABLED",
        "CONVERSATION_MODE",
        "KEEPALIVE_AFTER_SECS",
        "PLAYER_COMMAND",
        "YTDLP_COMMAND",
        "PLAY_AUDIO_LOCALLY",
        "PROMPTS_PATH",
        "RUST_LOG",
    ];

    fn clear_env_vars() {
        for var in ALL_VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("DEEPGRAM_API_KEY", "test-deepgram-key");
            env::set_var("GROQ_API_KEY", "test-groq-key");
        }
    }

    fn expect_invalid(var: &str, value: &str, expected: &str) {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var(var, value);
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(name, _) => assert_eq!(name, expected),
            other => panic!("Expected InvalidValue for {expected}, got {other:?}"),
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("sk-1234567890"), "sk-1***");
        assert_eq!(redact("ab"), "ab***");
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8000");
        assert_eq!(config.deepgram_api_key, "test-deepgram-key");
        assert_eq!(config.groq_api_key, "test-groq-key");
        assert_eq!(config.llm_api_base, "https://api.groq.com/openai/v1");
        assert_eq!(config.chat_model, "llama-3.1-8b-instant");
        assert_eq!(config.eleven_labs_api_key, None);
        assert_eq!(config.eleven_labs_voice_id, "21m00Tcm4TlvDq8ikWAM");
        assert_eq!(config.eleven_labs_model, "eleven_turbo_v2_5");
        assert_eq!(config.google_vision_api_key, None);
        assert_eq!(config.joke_threshold, 0.7);
        assert_eq!(config.max_response_length, 200);
        assert!(config.streaming_enabled);
        assert!(!config.conversation_mode);
        assert_eq!(config.keepalive_after_secs, 8);
        assert_eq!(config.player_command, "ffplay");
        assert_eq!(config.ytdlp_command, "yt-dlp");
        assert!(!config.play_audio_locally);
        assert_eq!(config.prompts_path, None);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("CHAT_MODEL", "llama-3.3-70b-versatile");
            env::set_var("ELEVEN_LABS_API_KEY", "test-eleven-key");
            env::set_var("GOOGLE_VISION_API_KEY", "test-vision-key");
            env::set_var("JOKE_THRESHOLD", "0.0");
            env::set_var("MAX_RESPONSE_LENGTH", "120");
            env::set_var("STREAMING_ENABLED", "false");
            env::set_var("CONVERSATION_MODE", "1");
            env::set_var("PLAY_AUDIO_LOCALLY", "yes");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.chat_model, "llama-3.3-70b-versatile");
        assert_eq!(config.eleven_labs_api_key.as_deref(), Some("test-eleven-key"));
        assert_eq!(config.google_vision_api_key.as_deref(), Some("test-vision-key"));
        assert_eq!(config.joke_threshold, 0.0);
        assert_eq!(config.max_response_length, 120);
        assert!(!config.streaming_enabled);
        assert!(config.conversation_mode);
        assert!(config.play_audio_locally);
        assert_eq!(config.prompts_path, Some(PathBuf::from("/custom/prompts")));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_keys() {
        clear_env_vars();
        unsafe {
            env::set_var("GROQ_API_KEY", "test-groq-key");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(var) => assert_eq!(var, "DEEPGRAM_API_KEY"),
            _ => panic!("Expected MissingVar for DEEPGRAM_API_KEY"),
        }

        clear_env_vars();
        unsafe {
            env::set_var("DEEPGRAM_API_KEY", "test-deepgram-key");
            env::set_var("GROQ_API_KEY", "   ");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(var) => assert_eq!(var, "GROQ_API_KEY"),
            _ => panic!("Expected MissingVar for GROQ_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_values() {
        expect_invalid("BIND_ADDRESS", "not-a-valid-address", "BIND_ADDRESS");
        expect_invalid("RUST_LOG", "not-a-level", "RUST_LOG");
        expect_invalid("JOKE_THRESHOLD", "1.5", "JOKE_THRESHOLD");
        expect_invalid("JOKE_THRESHOLD", "high", "JOKE_THRESHOLD");
        expect_invalid("MAX_RESPONSE_LENGTH", "-3", "MAX_RESPONSE_LENGTH");
        expect_invalid("STREAMING_ENABLED", "maybe", "STREAMING_ENABLED");
        expect_invalid("KEEPALIVE_AFTER_SECS", "soon", "KEEPALIVE_AFTER_SECS");
    }
}
