//! Game and server configuration
//!
//! [`Options`] holds the per-session tuning knobs (round timing, scoring,
//! grace periods, rate limits). [`ServerConfig`] wraps it together with the
//! settings that only matter to the server binary. Both deserialize from
//! camelCase JSON with every field defaulted, and are validated with `garde`.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{options::*, session};

/// Validation result type for duration validation
type ValidationResult = garde::Result;

/// Validates that a duration falls within specified bounds.
///
/// # Generics
///
/// * `MIN_SECONDS` - The minimum allowed duration in seconds (inclusive).
/// * `MAX_SECONDS` - The maximum allowed duration in seconds (inclusive).
///
/// # Errors
///
/// Returns a `garde::Error` if the duration is outside the specified bounds.
pub fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Duration,
    _ctx: &(),
) -> ValidationResult {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_SECONDS},{MAX_SECONDS}]",
        )))
    }
}

/// Points handed out for correct guesses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct PointScheme {
    /// Points for the first correct guesser of a round
    #[garde(range(max = MAX_POINTS))]
    pub first_guess: u64,
    /// Points for every later correct guesser
    #[garde(range(max = MAX_POINTS))]
    pub later_guess: u64,
    /// Points the drawer earns per correct guesser
    #[garde(range(max = MAX_POINTS))]
    pub drawer_per_guesser: u64,
}

impl Default for PointScheme {
    fn default() -> Self {
        Self {
            first_guess: 10,
            later_guess: 5,
            drawer_per_guesser: 2,
        }
    }
}

/// How much of the secret word non-drawers are shown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HintStyle {
    /// Only the number of letters
    Length,
    /// The number of letters and an underscore pattern keeping spaces
    #[default]
    Pattern,
}

/// Token bucket settings applied to chat and guesses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimit {
    /// Messages a player may send back to back
    #[garde(range(min = 1, max = MAX_RATE))]
    pub burst: u32,
    /// Tokens regained per second
    #[garde(range(min = 1, max = MAX_RATE))]
    pub per_second: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            burst: 8,
            per_second: 4,
        }
    }
}

/// Per-session game options
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Time a drawer has before the word is revealed
    #[garde(custom(validate_duration::<MIN_ROUND_DURATION, MAX_ROUND_DURATION>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub round_duration: Duration,
    /// Pause between the reveal and the next turn
    #[garde(custom(validate_duration::<MIN_ROUND_END_PAUSE, MAX_ROUND_END_PAUSE>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub round_end_pause: Duration,
    /// How many recent words are excluded from the next pick
    #[garde(range(min = 1, max = MAX_RECENT_WORD_WINDOW))]
    pub recent_word_window: usize,
    /// Start a round as soon as enough players are connected
    #[garde(skip)]
    pub auto_start: bool,
    /// Connected players needed to run rounds
    #[garde(range(min = session::MIN_PLAYER_COUNT, max = session::MAX_PLAYER_COUNT))]
    pub min_players: usize,
    /// Members allowed in one session
    #[garde(range(min = session::MIN_PLAYER_COUNT, max = session::MAX_PLAYER_COUNT))]
    pub max_players: usize,
    /// Scoring rules
    #[garde(dive)]
    pub points: PointScheme,
    /// Hint shown to non-drawers
    #[garde(skip)]
    pub hint: HintStyle,
    /// Time a dropped connection keeps its seat
    #[garde(custom(validate_duration::<MIN_DISCONNECT_GRACE, MAX_DISCONNECT_GRACE>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub disconnect_grace: Duration,
    /// Time an empty session survives before it is destroyed
    #[garde(custom(validate_duration::<MIN_EMPTY_SESSION_GRACE, MAX_EMPTY_SESSION_GRACE>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub empty_session_grace: Duration,
    /// Time without any activity after which a session is destroyed
    #[garde(custom(validate_duration::<MIN_IDLE_TIMEOUT, MAX_IDLE_TIMEOUT>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub idle_timeout: Duration,
    /// Chat and guess throttling
    #[garde(dive)]
    pub rate_limit: RateLimit,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(80),
            round_end_pause: Duration::from_secs(3),
            recent_word_window: 5,
            auto_start: true,
            min_players: 2,
            max_players: 16,
            points: PointScheme::default(),
            hint: HintStyle::default(),
            disconnect_grace: Duration::from_secs(10),
            empty_session_grace: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10 * 60),
            rate_limit: RateLimit::default(),
        }
    }
}

/// Errors raised while loading a [`ServerConfig`]
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration or word list file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that failed to load
        path: PathBuf,
        /// Underlying io error
        source: std::io::Error,
    },
    /// The configuration file is not valid JSON for this schema
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of its allowed range
    #[error("invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
    /// The bind address override could not be parsed
    #[error("invalid address {0:?}")]
    Address(String),
}

/// Everything the server binary needs to start
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Socket address the WebSocket endpoint listens on
    #[garde(skip)]
    pub address: SocketAddr,
    /// Optional newline-separated word list replacing the built-in bank
    #[garde(skip)]
    pub word_list: Option<PathBuf>,
    /// Game options applied to every session
    #[garde(dive)]
    pub options: Options,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            word_list: None,
            options: Options::default(),
        }
    }
}

/// Environment variable naming the JSON configuration file
pub const CONFIG_ENV: &str = "DRAWGUESS_CONFIG";
/// Environment variable overriding the bind address
pub const ADDRESS_ENV: &str = "DRAWGUESS_ADDR";

impl ServerConfig {
    /// Parses and validates a configuration from JSON text
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed input and [`Error::Invalid`]
    /// when a value is out of bounds.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration named by `DRAWGUESS_CONFIG`, falling back to
    /// defaults, then applies the `DRAWGUESS_ADDR` override
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not validate.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| Error::Io { path, source })?;
                Self::from_json(&text)?
            }
            None => Self::default(),
        };

        if let Ok(address) = std::env::var(ADDRESS_ENV) {
            config.address = address.parse().map_err(|_| Error::Address(address))?;
        }

        Ok(config)
    }

    /// Reads the configured word list, if any
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub fn read_word_list(&self) -> Result<Option<String>, Error> {
        self.word_list
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path).map_err(|source| Error::Io {
                    path: path.clone(),
                    source,
                })
            })
            .transpose()
    }
}
