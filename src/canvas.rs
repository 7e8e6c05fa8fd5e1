//! Drawing relay
//!
//! Strokes are relayed from the drawer to everyone else and buffered for the
//! running round so a player arriving mid-round can redraw the picture.

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::constants::canvas::{MAX_COLOR_LENGTH, MAX_COORDINATE, MAX_HISTORY};

/// Validates that a coordinate is finite and within the canvas bound
fn validate_coordinate(value: &f64, _ctx: &()) -> garde::Result {
    if value.is_finite() && value.abs() <= MAX_COORDINATE {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "coordinate must be within ±{MAX_COORDINATE}"
        )))
    }
}

/// One point of a drawn path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    /// Horizontal position
    #[garde(custom(validate_coordinate))]
    pub x: f64,
    /// Vertical position
    #[garde(custom(validate_coordinate))]
    pub y: f64,
    /// CSS colour of the segment
    #[garde(length(min = 1, max = MAX_COLOR_LENGTH))]
    pub color: String,
    /// Marks the first point of a new path
    #[serde(default)]
    #[garde(skip)]
    pub begin: bool,
}

/// Canvas events relayed to non-drawers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMessage {
    /// A new point from the drawer
    Stroke(Stroke),
    /// The drawer wiped the canvas
    ClearCanvas,
}

/// Strokes drawn so far in the running round
#[derive(Debug, Default, Clone)]
pub struct StrokeHistory {
    strokes: Vec<Stroke>,
}

impl StrokeHistory {
    /// Buffers a stroke, returning `false` once the round's buffer is full
    ///
    /// A full buffer only stops buffering. Relaying continues.
    pub fn push(&mut self, stroke: Stroke) -> bool {
        if self.strokes.len() >= MAX_HISTORY {
            return false;
        }
        self.strokes.push(stroke);
        true
    }

    /// Drops every buffered stroke
    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    /// Buffered strokes, oldest first
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// Number of buffered strokes
    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn stroke(x: f64, y: f64) -> Stroke {
        Stroke {
            x,
            y,
            color: "#000000".to_string(),
            begin: false,
        }
    }

    #[test]
    fn test_stroke_validation() {
        assert!(stroke(10., 20.).validate().is_ok());
        assert!(stroke(-MAX_COORDINATE, MAX_COORDINATE).validate().is_ok());
        assert!(stroke(MAX_COORDINATE + 1., 0.).validate().is_err());
        assert!(stroke(f64::NAN, 0.).validate().is_err());
        assert!(stroke(0., f64::INFINITY).validate().is_err());

        let mut blank = stroke(0., 0.);
        blank.color = String::new();
        assert!(blank.validate().is_err());

        let mut long = stroke(0., 0.);
        long.color = "x".repeat(MAX_COLOR_LENGTH + 1);
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_stroke_begin_defaults_to_false() {
        let stroke: Stroke = serde_json::from_str(r##"{"x":1,"y":2,"color":"#fff"}"##).unwrap();
        assert!(!stroke.begin);

        let stroke: Stroke =
            serde_json::from_str(r##"{"x":1,"y":2,"color":"#fff","begin":true}"##).unwrap();
        assert!(stroke.begin);
    }

    #[test]
    fn test_update_message_wire_format() {
        assert_eq!(
            serde_json::to_string(&UpdateMessage::ClearCanvas).unwrap(),
            "\"clearCanvas\""
        );
        let json = serde_json::to_string(&UpdateMessage::Stroke(stroke(1., 2.))).unwrap();
        assert_eq!(
            json,
            r##"{"stroke":{"x":1.0,"y":2.0,"color":"#000000","begin":false}}"##
        );
    }

    #[test]
    fn test_history_caps_at_limit() {
        let mut history = StrokeHistory::default();
        for i in 0..MAX_HISTORY {
            assert!(history.push(stroke(i as f64 % 100., 0.)));
        }
        assert!(!history.push(stroke(0., 0.)));
        assert_eq!(history.len(), MAX_HISTORY);

        history.clear();
        assert!(history.is_empty());
    }
}
