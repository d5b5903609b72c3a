//! Configuration parsing and validation.
//!
//! The service is configured from a single TOML file. Every section and
//! field has a default, so an empty file yields a working configuration
//! with one daily slot.
//!
//! ```toml
//! [schedule]
//! slots = ["09:00", "13:00", "19:00"]
//! utc_offset_minutes = 330
//! round_duration_secs = 1500
//! prize_window_secs = 120
//!
//! [prizes]
//! winners_per_round = 10
//! prize_amount = 50
//!
//! [wallet]
//! minimum_withdrawal = 50
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration parsed but is not usable.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QuizConfig {
    /// Round timing.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Prize slots per round.
    #[serde(default)]
    pub prizes: PrizeConfig,

    /// Question selection.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Wallet limits.
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Driver process settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl QuizConfig {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`Self::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule.validate()?;

        if self.prizes.winners_per_round == 0 {
            return Err(ConfigError::Validation(
                "prizes.winners_per_round must be at least 1".to_string(),
            ));
        }
        if self.prizes.prize_amount == 0 {
            return Err(ConfigError::Validation(
                "prizes.prize_amount must be at least 1".to_string(),
            ));
        }
        if self.wallet.minimum_withdrawal == 0 {
            return Err(ConfigError::Validation(
                "wallet.minimum_withdrawal must be at least 1".to_string(),
            ));
        }
        if self.daemon.tick_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "daemon.tick_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.daemon.tick_interval_secs >= self.schedule.activation_window_secs {
            return Err(ConfigError::Validation(format!(
                "daemon.tick_interval_secs ({}) must be shorter than schedule.activation_window_secs ({})",
                self.daemon.tick_interval_secs, self.schedule.activation_window_secs
            )));
        }
        Ok(())
    }
}

/// Daily slots and round timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Local times of day at which rounds open, as `HH:MM` or `HH:MM:SS`.
    #[serde(default = "default_slots")]
    pub slots: Vec<String>,

    /// Offset of local time from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Length of a round from open to close.
    #[serde(default = "default_round_duration_secs")]
    pub round_duration_secs: u64,

    /// Length of the prize-eligible window at the start of a round.
    #[serde(default = "default_prize_window_secs")]
    pub prize_window_secs: u64,

    /// How long after a slot the driver may still open its round.
    #[serde(default = "default_activation_window_secs")]
    pub activation_window_secs: u64,

    /// Tolerance around a slot when checking for an existing round.
    #[serde(default = "default_slot_tolerance_secs")]
    pub slot_tolerance_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            utc_offset_minutes: 0,
            round_duration_secs: default_round_duration_secs(),
            prize_window_secs: default_prize_window_secs(),
            activation_window_secs: default_activation_window_secs(),
            slot_tolerance_secs: default_slot_tolerance_secs(),
        }
    }
}

impl ScheduleConfig {
    /// Parse the configured slots, sorted by time of day.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an unparseable or duplicate
    /// slot.
    pub fn parsed_slots(&self) -> Result<Vec<NaiveTime>, ConfigError> {
        let mut slots = self
            .slots
            .iter()
            .map(|s| parse_slot(s))
            .collect::<Result<Vec<_>, _>>()?;
        slots.sort_unstable();
        if let Some(w) = slots.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Validation(format!(
                "duplicate schedule slot {}",
                w[0].format("%H:%M:%S")
            )));
        }
        Ok(slots)
    }

    /// Check timing constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let slots = self.parsed_slots()?;
        if slots.is_empty() {
            return Err(ConfigError::Validation(
                "schedule.slots must contain at least one slot".to_string(),
            ));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Validation(format!(
                "schedule.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        if self.round_duration_secs == 0 {
            return Err(ConfigError::Validation(
                "schedule.round_duration_secs must be at least 1".to_string(),
            ));
        }
        if self.prize_window_secs > self.round_duration_secs {
            return Err(ConfigError::Validation(format!(
                "schedule.prize_window_secs ({}) exceeds round_duration_secs ({})",
                self.prize_window_secs, self.round_duration_secs
            )));
        }
        if self.activation_window_secs == 0
            || self.activation_window_secs > self.round_duration_secs
        {
            return Err(ConfigError::Validation(format!(
                "schedule.activation_window_secs must be within 1..={}",
                self.round_duration_secs
            )));
        }

        // Rounds must not overlap, including the gap from the last slot of
        // one day to the first slot of the next. A slot's coverage window
        // reaches back by the tolerance, so it must not reach the previous
        // slot's round.
        let day_secs: i64 = 24 * 60 * 60;
        let round_secs = i64::try_from(self.round_duration_secs).unwrap_or(i64::MAX);
        let tolerance_secs = i64::try_from(self.slot_tolerance_secs).unwrap_or(i64::MAX);
        for (i, slot) in slots.iter().enumerate() {
            let next = slots[(i + 1) % slots.len()];
            let mut gap = (next - *slot).num_seconds();
            if gap <= 0 {
                gap += day_secs;
            }
            if gap < round_secs {
                return Err(ConfigError::Validation(format!(
                    "schedule slots {} and {} are closer than round_duration_secs ({})",
                    slot.format("%H:%M"),
                    next.format("%H:%M"),
                    self.round_duration_secs
                )));
            }
            if gap <= tolerance_secs {
                return Err(ConfigError::Validation(format!(
                    "schedule.slot_tolerance_secs ({}) must be shorter than the gap between slots {} and {}",
                    self.slot_tolerance_secs,
                    slot.format("%H:%M"),
                    next.format("%H:%M")
                )));
            }
        }
        Ok(())
    }
}

fn parse_slot(s: &str) -> Result<NaiveTime, ConfigError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| ConfigError::Validation(format!("invalid schedule slot {s:?}: {e}")))
}

fn default_slots() -> Vec<String> {
    vec!["19:00".to_string()]
}

const fn default_round_duration_secs() -> u64 {
    25 * 60
}

const fn default_prize_window_secs() -> u64 {
    2 * 60
}

const fn default_activation_window_secs() -> u64 {
    2 * 60
}

const fn default_slot_tolerance_secs() -> u64 {
    60
}

/// Prize slots per round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PrizeConfig {
    /// Capacity of a round's winner set.
    #[serde(default = "default_winners_per_round")]
    pub winners_per_round: u32,

    /// Amount credited on entry into the winner set.
    #[serde(default = "default_prize_amount")]
    pub prize_amount: u64,
}

impl Default for PrizeConfig {
    fn default() -> Self {
        Self {
            winners_per_round: default_winners_per_round(),
            prize_amount: default_prize_amount(),
        }
    }
}

const fn default_winners_per_round() -> u32 {
    10
}

const fn default_prize_amount() -> u64 {
    50
}

/// Question selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SelectionConfig {
    /// Questions used by this many most recent rounds are avoided.
    #[serde(default = "default_recent_rounds_excluded")]
    pub recent_rounds_excluded: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            recent_rounds_excluded: default_recent_rounds_excluded(),
        }
    }
}

const fn default_recent_rounds_excluded() -> u32 {
    10
}

/// Wallet limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WalletConfig {
    /// Smallest balance that may be withdrawn.
    #[serde(default = "default_minimum_withdrawal")]
    pub minimum_withdrawal: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            minimum_withdrawal: default_minimum_withdrawal(),
        }
    }
}

const fn default_minimum_withdrawal() -> u64 {
    50
}

/// Driver process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Path to the `SQLite` database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Seconds between lifecycle ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Failed result deliveries after which a round is marked announced
    /// anyway.
    #[serde(default = "default_max_announce_attempts")]
    pub max_announce_attempts: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            tick_interval_secs: default_tick_interval_secs(),
            max_announce_attempts: default_max_announce_attempts(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("quizround.db")
}

const fn default_tick_interval_secs() -> u64 {
    30
}

const fn default_max_announce_attempts() -> u32 {
    5
}
