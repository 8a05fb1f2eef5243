//! Flow classification over the trailing message window.

use serde::Serialize;

use super::model::{Direction, Message};

/// Coarse balance classification of the recent exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPattern {
    Empty,
    /// We keep sending and nothing comes back.
    Monologue,
    /// The contact dominates the window.
    Responsive,
    /// We dominate the window.
    Initiating,
    Balanced,
}

impl FlowPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowPattern::Empty => "empty",
            FlowPattern::Monologue => "monologue",
            FlowPattern::Responsive => "responsive",
            FlowPattern::Initiating => "initiating",
            FlowPattern::Balanced => "balanced",
        }
    }
}

/// Shape of the recent exchange, used to steer prompt construction.
#[derive(Debug, Clone, Serialize)]
pub struct FlowAnalysis {
    pub pattern: FlowPattern,
    /// True when the most recent message is ours, i.e. the contact has
    /// not replied yet.
    pub awaiting_response: bool,
    /// Elapsed milliseconds since the oldest message in the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_age_ms: Option<i64>,
    pub incoming: usize,
    pub outgoing: usize,
}

impl FlowAnalysis {
    /// Classify the trailing window. `now_ms` is injected so callers
    /// control the clock.
    pub fn from_window(window: &[Message], now_ms: i64) -> Self {
        let incoming = window
            .iter()
            .filter(|m| m.direction == Direction::Incoming)
            .count();
        let outgoing = window.len() - incoming;

        let pattern = if window.is_empty() {
            FlowPattern::Empty
        } else if incoming == 0 {
            FlowPattern::Monologue
        } else if incoming > 2 * outgoing {
            FlowPattern::Responsive
        } else if outgoing > 2 * incoming {
            FlowPattern::Initiating
        } else {
            FlowPattern::Balanced
        };

        Self {
            pattern,
            awaiting_response: window
                .last()
                .is_some_and(|m| m.direction == Direction::Outgoing),
            window_age_ms: window.first().map(|m| now_ms - m.timestamp),
            incoming,
            outgoing,
        }
    }
}
