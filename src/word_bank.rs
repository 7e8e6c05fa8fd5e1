//! Secret words and how they are chosen
//!
//! A [`WordBank`] is built once at startup and shared by every session behind
//! an `Arc`. It never changes afterwards. What each session has drawn
//! recently lives in that session's own [`RecentWords`], so sessions never
//! contend over word selection.

use std::collections::{HashSet, VecDeque};

use itertools::Itertools;
use serde::Serialize;
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::{config::HintStyle, constants::word::MAX_LENGTH};

/// Words used when no word list is configured
const DEFAULT_WORDS: [&str; 15] = [
    "Star", "House", "Bridge", "Car", "Bicycle", "Computer", "Guitar", "Mountain", "River", "Tree",
    "Clock", "Key", "Book", "Sun", "Moon",
];

/// Errors raised while building a word bank
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Error {
    /// No usable words were supplied
    #[error("word bank cannot be empty")]
    Empty,
    /// An entry is blank after trimming
    #[error("word cannot be blank")]
    Blank,
    /// An entry exceeds the maximum word length
    #[error("word {0:?} is too long")]
    TooLong(String),
}

/// Canonical form used to compare guesses with the secret word
///
/// Leading and trailing whitespace is dropped, internal runs of whitespace
/// collapse to one space and letters are lowercased.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().join(" ").to_lowercase()
}

/// An immutable list of candidate words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordBank {
    words: Vec<String>,
}

impl Default for WordBank {
    fn default() -> Self {
        Self {
            words: DEFAULT_WORDS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl WordBank {
    /// Builds a bank from a list of words
    ///
    /// Entries are stored as written, with whitespace runs collapsed to one
    /// space. Entries that normalize to the same text are kept once, in
    /// first-seen order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Empty` for an empty list, `Error::Blank` for a blank
    /// entry and `Error::TooLong` for an entry over the length limit.
    pub fn new<I, S>(words: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut bank = Vec::new();

        for word in words {
            let word = word.as_ref().split_whitespace().join(" ");
            if word.is_empty() {
                return Err(Error::Blank);
            }
            if word.chars().count() > MAX_LENGTH {
                return Err(Error::TooLong(word));
            }
            if seen.insert(normalize(&word)) {
                bank.push(word);
            }
        }

        if bank.is_empty() {
            return Err(Error::Empty);
        }

        Ok(Self { words: bank })
    }

    /// Builds a bank from newline-separated text
    ///
    /// Blank lines and lines starting with `#` are ignored.
    ///
    /// # Errors
    ///
    /// Same as [`WordBank::new`].
    pub fn from_lines(text: &str) -> Result<Self, Error> {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Number of words in the bank
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the bank has no words, which a constructed bank never has
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// All words in the bank
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Picks a word uniformly at random, avoiding recently used ones
    ///
    /// When `recent` already covers the whole bank it is cleared first, but
    /// the word picked last is still avoided as long as the bank has another
    /// choice. The pick is recorded in `recent`.
    pub fn pick(&self, rng: &mut fastrand::Rng, recent: &mut RecentWords) -> String {
        let mut candidates = self
            .words
            .iter()
            .filter(|word| !recent.contains(word))
            .collect_vec();

        if candidates.is_empty() {
            let last = recent.last().map(ToOwned::to_owned);
            recent.clear();
            candidates = self
                .words
                .iter()
                .filter(|word| self.words.len() < 2 || last.as_ref() != Some(*word))
                .collect_vec();
        }

        let word = match candidates.as_slice() {
            [] => self.words[rng.usize(..self.words.len())].clone(),
            _ => candidates[rng.usize(..candidates.len())].clone(),
        };

        recent.push(word.clone());
        word
    }
}

/// The words a session drew most recently, oldest first
#[derive(Debug, Clone)]
pub struct RecentWords {
    words: VecDeque<String>,
    window: usize,
}

impl RecentWords {
    /// Creates an empty history remembering at most `window` words
    pub fn new(window: usize) -> Self {
        Self {
            words: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    /// Records a pick, forgetting the oldest one when the window is full
    pub fn push(&mut self, word: String) {
        if self.words.len() == self.window {
            self.words.pop_front();
        }
        self.words.push_back(word);
    }

    /// Whether a word is in the window
    pub fn contains(&self, word: &str) -> bool {
        self.words.iter().any(|recent| recent == word)
    }

    /// The word picked most recently
    pub fn last(&self) -> Option<&str> {
        self.words.back().map(String::as_str)
    }

    /// Forgets every remembered word
    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Number of remembered words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// What non-drawers are told about the secret word
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    /// Number of letters and digits in the word
    pub length: usize,
    /// The word with every letter or digit replaced by `_`
    pub pattern: Option<String>,
}

impl Hint {
    /// Derives the hint for a word
    pub fn new(word: &str, style: HintStyle) -> Self {
        let length = word.chars().filter(|c| c.is_alphanumeric()).count();
        let pattern = match style {
            HintStyle::Length => None,
            HintStyle::Pattern => Some(
                word.chars()
                    .map(|c| if c.is_alphanumeric() { '_' } else { c })
                    .collect(),
            ),
        };
        Self { length, pattern }
    }
}
