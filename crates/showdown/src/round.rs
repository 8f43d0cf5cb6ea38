//! Round commands.
//!
//! Maps input lines to the actions a facilitator or participant may take.
//! The state transitions themselves live on [`crate::registry::Registry`];
//! this module only decides what a line means.

use std::time::Duration;

/// The card deck participants choose from.
pub const POINT_OPTIONS: &[&str] = &["0.5", "1", "2", "3", "5", "8", "10", "?"];

/// Countdown presets: facilitator key and duration. The key is the number
/// of minutes.
pub const COUNTDOWN_PRESETS: &[(&str, Duration)] = &[
    ("1", Duration::from_secs(60)),
    ("2", Duration::from_secs(2 * 60)),
    ("3", Duration::from_secs(3 * 60)),
    ("5", Duration::from_secs(5 * 60)),
];

/// Duration for a countdown preset key.
#[must_use]
pub fn countdown_preset(key: &str) -> Option<Duration> {
    COUNTDOWN_PRESETS
        .iter()
        .find(|(preset, _)| *preset == key)
        .map(|(_, duration)| *duration)
}

/// Whether `token` is a card in the deck.
#[must_use]
pub fn is_point_option(token: &str) -> bool {
    POINT_OPTIONS.contains(&token)
}

fn is_quit(input: &str) -> bool {
    matches!(input, "q" | "esc" | "exit" | "\x1b")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilitatorCommand {
    Reveal,
    Clear,
    DisconnectAll,
    StartCountdown(Duration),
    Quit,
}

impl FacilitatorCommand {
    /// Parse one input line. Unknown input yields `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let input = line.trim();
        if is_quit(input) {
            return Some(Self::Quit);
        }
        match input {
            "r" => Some(Self::Reveal),
            "c" => Some(Self::Clear),
            "d" => Some(Self::DisconnectAll),
            other => countdown_preset(other).map(Self::StartCountdown),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantCommand {
    Vote(String),
    Quit,
}

impl ParticipantCommand {
    /// Parse one input line. Anything outside the deck yields `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let input = line.trim();
        if is_quit(input) {
            return Some(Self::Quit);
        }
        is_point_option(input).then(|| Self::Vote(input.to_string()))
    }
}
