//! Plain-text views.
//!
//! Every renderer is a pure function of a [`SessionSnapshot`] (plus the
//! current instant for countdowns), so output is deterministic for a given
//! snapshot.

use crate::registry::{RoundPhase, SessionSnapshot};
use crate::round::{COUNTDOWN_PRESETS, POINT_OPTIONS};
use crate::stats::VoteSummary;
use std::fmt::Write as _;
use tokio::time::Instant;

/// Width of a distribution bar in columns.
pub const BAR_WIDTH: usize = 50;

const BAR_FILLED: char = '█';
const BAR_EMPTY: char = '░';

/// Name entry screen, optionally with the last validation error.
#[must_use]
pub fn name_entry(error: Option<&str>) -> String {
    let mut out = String::from("Welcome to Showdown!\n\nEnter your name:\n");
    if let Some(error) = error {
        let _ = writeln!(out, "\nError: {error}");
    }
    out
}

/// A participant's view of the current round.
#[must_use]
pub fn participant(name: &str, snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Showdown - Player: {name}\n");

    match snapshot.phase() {
        RoundPhase::Voting => {
            let selected = snapshot
                .participant(name)
                .and_then(|entry| entry.vote.as_deref());
            out.push_str("Choose your points:\n");
            for option in POINT_OPTIONS {
                let marker = if selected == Some(*option) { '>' } else { ' ' };
                let _ = writeln!(out, "{marker} {option}");
            }
            if let Some(selected) = selected {
                let _ = writeln!(out, "\nSelected: {selected}");
            }
        }
        RoundPhase::Revealed => {
            out.push_str("Voting Results:\n\nPlayer Votes:\n");
            for entry in &snapshot.participants {
                let vote = entry.vote.as_deref().unwrap_or("no vote");
                let _ = writeln!(out, "* {}: {vote}", entry.name);
            }
            if snapshot.voted_count() > 0 {
                out.push_str(&statistics(&snapshot.summary()));
            }
        }
    }

    out.push_str("\nPress q to quit\n");
    out
}

/// The facilitator's dashboard.
#[must_use]
pub fn facilitator(snapshot: &SessionSnapshot, now: Instant) -> String {
    let mut out = String::from("Showdown - Facilitator\n\n");

    if let Some(countdown) = snapshot.countdown {
        let remaining = countdown.remaining_at(now);
        if remaining.is_zero() {
            out.push_str("Time's up!\n\n");
        } else {
            // Round up so a fresh one-minute countdown shows 01:00.
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            let _ = writeln!(out, "Timer: {:02}:{:02}\n", secs / 60, secs % 60);
        }
    }

    if snapshot.participants.is_empty() {
        out.push_str("Waiting for players to join...\n");
    } else {
        let _ = writeln!(out, "Connected Players: {}\n", snapshot.participant_count());
        out.push_str("Players:\n");
        for entry in &snapshot.participants {
            let status = match (snapshot.phase(), entry.vote.as_deref()) {
                (RoundPhase::Revealed, Some(vote)) => vote,
                (RoundPhase::Revealed, None) => "no vote",
                (RoundPhase::Voting, Some(_)) => "✓",
                (RoundPhase::Voting, None) => "waiting...",
            };
            let _ = writeln!(out, "* {}: {status}", entry.name);
        }

        let voted = snapshot.voted_count();
        if snapshot.revealed && voted > 0 {
            out.push_str(&statistics(&snapshot.summary()));
        } else {
            let _ = writeln!(
                out,
                "\nVoting Progress: {voted}/{}",
                snapshot.participant_count()
            );
        }
    }

    out.push_str(&facilitator_help());
    out
}

fn facilitator_help() -> String {
    let presets = COUNTDOWN_PRESETS
        .iter()
        .map(|(key, duration)| format!("{key} {}m", duration.as_secs() / 60))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "\nr reveal | c clear | d disconnect all | q quit\ntimer: {presets}\n"
    )
}

/// Statistics block for a revealed round with at least one vote.
#[must_use]
pub fn statistics(summary: &VoteSummary) -> String {
    let mut out = String::from("\nVoting Statistics:\n");
    if summary.has_average() {
        let _ = writeln!(out, "Average: {:.1}", summary.average);
    }
    let _ = writeln!(out, "Median: {}", summary.median_label());
    out.push_str("Distribution:\n");
    for (token, count) in summary.buckets() {
        let share = summary.share(token);
        let _ = writeln!(out, "{token}: {count} votes ({:.1}%)", share * 100.0);
        let _ = writeln!(out, "{}\n", bar(share));
    }
    out
}

fn bar(share: f64) -> String {
    // share is within 0..=1, so the product fits in BAR_WIDTH.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let filled = ((share.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    let mut bar = String::with_capacity(BAR_WIDTH * 3);
    bar.extend(std::iter::repeat(BAR_FILLED).take(filled));
    bar.extend(std::iter::repeat(BAR_EMPTY).take(BAR_WIDTH - filled));
    bar
}
