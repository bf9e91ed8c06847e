use ai::{parse_backend, ChooserConfig, Difficulty};
use engine::{EngineError, GameState, PlayMode, MAX_PLAYERS, MIN_PLAYERS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Options read once per match start or restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSettings {
    #[serde(default = "default_player_count")]
    pub player_count: usize,
    #[serde(default)]
    pub mode: PlayMode,
    #[serde(default)]
    pub ai_difficulty: Difficulty,
}

fn default_player_count() -> usize {
    MIN_PLAYERS
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            player_count: default_player_count(),
            mode: PlayMode::Ai,
            ai_difficulty: Difficulty::Medium,
        }
    }
}

impl MatchSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if (MIN_PLAYERS..=MAX_PLAYERS).contains(&self.player_count) {
            Ok(())
        } else {
            Err(EngineError::InvalidPlayerCount(self.player_count))
        }
    }

    pub fn build_state(&self) -> Result<GameState, EngineError> {
        GameState::new(self.player_count, self.mode)
    }
}

/// Artificial delays used by the match actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub roll_delay: Duration,
    pub think_min: Duration,
    pub think_max: Duration,
    pub ai_skip_delay: Duration,
    pub human_skip_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            roll_delay: Duration::from_millis(600),
            think_min: Duration::from_millis(500),
            think_max: Duration::from_millis(1200),
            ai_skip_delay: Duration::from_millis(500),
            human_skip_delay: Duration::from_millis(800),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `None` keeps settings and history in memory only.
    pub data_dir: Option<PathBuf>,
    pub ai: ChooserConfig,
    pub timing: Timing,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            data_dir: None,
            ai: ChooserConfig::default(),
            timing: Timing::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, fallback: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(fallback)
        };

        let timing = {
            let base = defaults.timing;
            let think_min = millis("LUDO_THINK_MIN_MS", base.think_min);
            let think_max = millis("LUDO_THINK_MAX_MS", base.think_max).max(think_min);
            Timing {
                roll_delay: millis("LUDO_ROLL_DELAY_MS", base.roll_delay),
                think_min,
                think_max,
                ai_skip_delay: millis("LUDO_AI_SKIP_DELAY_MS", base.ai_skip_delay),
                human_skip_delay: millis("LUDO_HUMAN_SKIP_DELAY_MS", base.human_skip_delay),
            }
        };

        let ai = ChooserConfig {
            backend: lookup("LUDO_AI_BACKEND")
                .map(|v| parse_backend(&v))
                .unwrap_or(defaults.ai.backend),
            url: lookup("LUDO_AI_URL").unwrap_or(defaults.ai.url),
            timeout: millis("LUDO_AI_TIMEOUT_MS", defaults.ai.timeout).max(Duration::from_millis(1)),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|v| u16::from_str(v.trim()).ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("LUDO_DATA_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            ai,
            timing,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
