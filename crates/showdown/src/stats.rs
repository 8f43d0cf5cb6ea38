//! Vote statistics for a revealed round.
//!
//! Tokens are bucketed by their literal form, so `"1"` and `"1.0"` land in
//! different buckets. Only tokens that parse as finite decimal numbers feed
//! the average and median; everything else (the `?` card) is still counted
//! in the distribution.

use std::collections::BTreeMap;

/// Median label when a round has no numeric votes.
pub const MEDIAN_NOT_AVAILABLE: &str = "N/A";

/// Aggregated view of one round's votes.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteSummary {
    /// Arithmetic mean of the numeric votes, 0 when there are none.
    pub average: f64,
    /// Median of the numeric votes, `None` when there are none.
    pub median: Option<f64>,
    /// Number of votes that parsed as numbers.
    pub numeric_votes: usize,
    /// Number of votes summarized, numeric or not.
    pub total_votes: usize,
    /// Count per literal token, iterated in lexicographic order.
    pub distribution: BTreeMap<String, usize>,
}

impl VoteSummary {
    /// Whether the average is meaningful enough to display.
    #[must_use]
    pub fn has_average(&self) -> bool {
        self.numeric_votes > 0
    }

    /// Median formatted to one decimal place, or `N/A`.
    #[must_use]
    pub fn median_label(&self) -> String {
        match self.median {
            Some(median) => format!("{median:.1}"),
            None => MEDIAN_NOT_AVAILABLE.to_string(),
        }
    }

    /// Share of all summarized votes that went to `token`, in `0.0..=1.0`.
    #[must_use]
    pub fn share(&self, token: &str) -> f64 {
        let count = self.distribution.get(token).copied().unwrap_or(0);
        if self.total_votes == 0 {
            return 0.0;
        }
        // Vote counts are bounded by the participant cap.
        #[allow(clippy::cast_precision_loss)]
        let share = count as f64 / self.total_votes as f64;
        share
    }

    /// Buckets in display order.
    pub fn buckets(&self) -> impl Iterator<Item = (&str, usize)> {
        self.distribution
            .iter()
            .map(|(token, count)| (token.as_str(), *count))
    }
}

/// Parse a vote token as a decimal number.
fn numeric_value(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Summarize a list of vote tokens.
///
/// The result does not depend on the order of `votes`: numeric values are
/// sorted before they are summed.
#[must_use]
pub fn summarize<S: AsRef<str>>(votes: &[S]) -> VoteSummary {
    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut numeric: Vec<f64> = Vec::with_capacity(votes.len());

    for vote in votes {
        let token = vote.as_ref();
        *distribution.entry(token.to_string()).or_insert(0) += 1;
        if let Some(value) = numeric_value(token) {
            numeric.push(value);
        }
    }

    numeric.sort_by(f64::total_cmp);

    let average = if numeric.is_empty() {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let count = numeric.len() as f64;
        numeric.iter().sum::<f64>() / count
    };

    VoteSummary {
        average,
        median: median_of_sorted(&numeric),
        numeric_votes: numeric.len(),
        total_votes: votes.len(),
        distribution,
    }
}

fn median_of_sorted(sorted: &[f64]) -> Option<f64> {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        return sorted.get(mid).copied();
    }
    let lower = sorted.get(mid.checked_sub(1)?)?;
    let upper = sorted.get(mid)?;
    Some((lower + upper) / 2.0)
}
