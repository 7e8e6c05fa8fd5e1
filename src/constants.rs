//! Configuration constants for the drawguess game system
//!
//! This module contains the fixed limits and constraints used throughout
//! the game system. Tunable values that operators may want to change live
//! in [`crate::config::Options`] instead.

/// Session membership limits
pub mod session {
    /// Hard cap on players in a single session, whatever the options say
    pub const MAX_PLAYER_COUNT: usize = 64;
    /// Fewest connected players that can keep rounds going
    pub const MIN_PLAYER_COUNT: usize = 2;
}

/// Player name limits
pub mod name {
    /// Maximum length of a player name in bytes
    pub const MAX_LENGTH: usize = 30;
}

/// Chat and guess text limits
pub mod chat {
    /// Maximum length of a chat message or guess in characters
    pub const MAX_LENGTH: usize = 200;
}

/// Word bank limits
pub mod word {
    /// Maximum length of a secret word in characters
    pub const MAX_LENGTH: usize = 40;
}

/// Canvas and stroke limits
pub mod canvas {
    /// Largest accepted absolute value of a stroke coordinate
    pub const MAX_COORDINATE: f64 = 8192.;
    /// Maximum length of a stroke colour string (e.g. `#12ab9f`)
    pub const MAX_COLOR_LENGTH: usize = 32;
    /// Maximum number of strokes buffered for a single round
    pub const MAX_HISTORY: usize = 20_000;
}

/// Bounds for [`crate::config::Options`] fields
pub mod options {
    /// Minimum round duration in seconds
    pub const MIN_ROUND_DURATION: u64 = 10;
    /// Maximum round duration in seconds
    pub const MAX_ROUND_DURATION: u64 = 600;
    /// Minimum pause between rounds in seconds
    pub const MIN_ROUND_END_PAUSE: u64 = 0;
    /// Maximum pause between rounds in seconds
    pub const MAX_ROUND_END_PAUSE: u64 = 30;
    /// Minimum disconnect grace period in seconds
    pub const MIN_DISCONNECT_GRACE: u64 = 0;
    /// Maximum disconnect grace period in seconds
    pub const MAX_DISCONNECT_GRACE: u64 = 300;
    /// Minimum grace period for an empty session in seconds
    pub const MIN_EMPTY_SESSION_GRACE: u64 = 0;
    /// Maximum grace period for an empty session in seconds
    pub const MAX_EMPTY_SESSION_GRACE: u64 = 600;
    /// Minimum idle timeout in seconds
    pub const MIN_IDLE_TIMEOUT: u64 = 10;
    /// Maximum idle timeout in seconds
    pub const MAX_IDLE_TIMEOUT: u64 = 24 * 60 * 60;
    /// Maximum number of recently used words excluded from selection
    pub const MAX_RECENT_WORD_WINDOW: usize = 100;
    /// Maximum points awarded by any single scoring rule
    pub const MAX_POINTS: u64 = 1000;
    /// Maximum rate limit burst or refill value
    pub const MAX_RATE: u32 = 1000;
}
