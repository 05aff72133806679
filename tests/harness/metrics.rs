// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outcome tallies for load and abuse simulations.

use admission_gateway::{Decision, Rejection};
use std::collections::HashMap;

/// Possible outcomes for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Admitted,
    Unauthenticated,
    Throttled,
    ThrottledStoreDown,
}

impl Outcome {
    pub fn of(result: &Result<Decision, Rejection>) -> Self {
        match result {
            Ok(_) => Self::Admitted,
            Err(Rejection::Unauthenticated) => Self::Unauthenticated,
            Err(Rejection::Throttled {
                observed_count: Some(_),
                ..
            }) => Self::Throttled,
            Err(Rejection::Throttled {
                observed_count: None,
                ..
            }) => Self::ThrottledStoreDown,
        }
    }
}

/// Counts requests by outcome.
#[derive(Debug, Default)]
pub struct Tally {
    outcomes: HashMap<Outcome, usize>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &Result<Decision, Rejection>) {
        *self.outcomes.entry(Outcome::of(result)).or_insert(0) += 1;
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.outcomes.values().sum()
    }

    /// Print a summary for `--nocapture` runs.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        for outcome in [
            Outcome::Admitted,
            Outcome::Unauthenticated,
            Outcome::Throttled,
            Outcome::ThrottledStoreDown,
        ] {
            println!("  {:<20} {}", format!("{outcome:?}"), self.count(outcome));
        }
        println!("  {:<20} {}", "Total", self.total());
    }
}
