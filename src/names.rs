//! Player name management and validation
//!
//! This module handles the assignment and validation of player names within
//! a game session. It ensures name uniqueness, filters inappropriate content,
//! and maintains bidirectional mappings between player IDs and names.

use std::collections::HashMap;

use rustrict::CensorStr;
use serde::Serialize;
use thiserror::Error;

use super::{constants::name::MAX_LENGTH, watcher::Id};

/// Manages player names and their associations with player IDs
///
/// Names are unique within one session only; two sessions may both have a
/// player called "Alex".
#[derive(Debug, Default, Clone)]
pub struct Names {
    /// Primary mapping from player ID to name
    mapping: HashMap<Id, String>,
    /// Reverse mapping from name to player ID
    reverse_mapping: HashMap<String, Id>,
}

/// Errors that can occur during name validation and assignment
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested name is already in use by another player
    #[error("name already in-use")]
    Used,
    /// The name is empty or contains only whitespace
    #[error("name cannot be empty")]
    Empty,
    /// The name contains inappropriate content
    #[error("name is inappropriate")]
    Sinful,
    /// The name exceeds the maximum allowed length
    #[error("name is too long")]
    TooLong,
}

/// Trims and checks a requested name without assigning it
///
/// # Errors
///
/// * `Error::TooLong` - Name exceeds the maximum length
/// * `Error::Empty` - Name is empty after trimming whitespace
/// * `Error::Sinful` - Name contains inappropriate content
pub fn clean_name(name: &str) -> Result<&str, Error> {
    if name.len() > MAX_LENGTH {
        return Err(Error::TooLong);
    }
    let name = rustrict::trim_whitespace(name);
    if name.is_empty() {
        return Err(Error::Empty);
    }
    if name.is_inappropriate() {
        return Err(Error::Sinful);
    }
    Ok(name)
}

impl Names {
    /// Retrieves the name associated with a player ID
    pub fn get_name(&self, id: &Id) -> Option<&str> {
        self.mapping.get(id).map(String::as_str)
    }

    /// Retrieves the player ID associated with a name
    pub fn get_id(&self, name: &str) -> Option<Id> {
        self.reverse_mapping.get(name).copied()
    }

    /// Assigns a name to a player after validating it
    ///
    /// Returns the cleaned name. Assigning a new name to a player that
    /// already has one releases the old name.
    ///
    /// # Errors
    ///
    /// Returns the validation error from [`clean_name`], or `Error::Used`
    /// if another player already holds the name.
    pub fn set_name(&mut self, id: Id, name: &str) -> Result<String, Error> {
        let name = clean_name(name)?;
        match self.reverse_mapping.get(name) {
            Some(holder) if *holder == id => return Ok(name.to_owned()),
            Some(_) => return Err(Error::Used),
            None => {}
        }
        self.remove(&id);
        self.mapping.insert(id, name.to_owned());
        self.reverse_mapping.insert(name.to_owned(), id);
        Ok(name.to_owned())
    }

    /// Releases a player's name so someone else may take it
    ///
    /// Returns the released name, if the player had one.
    pub fn remove(&mut self, id: &Id) -> Option<String> {
        let name = self.mapping.remove(id)?;
        self.reverse_mapping.remove(&name);
        Some(name)
    }

    /// Number of named players
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether no player has a name
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}
