//! Vote counting and rock-paper-scissors tie resolution.
//!
//! Everything here is a pure function over its inputs. Randomness is drawn
//! through [`RandomSource`] so callers can substitute a fixed sequence.

use std::collections::{BTreeSet, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Source of uniform random choices for tie resolution.
pub trait RandomSource: Send {
    /// Return an index in `0..len`. Callers never pass `len == 0`.
    fn pick_index(&mut self, len: usize) -> usize;
}

/// Production random source backed by the thread-local `rand` generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick_index(&mut self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpsChoice {
    Rock,
    Paper,
    Scissors,
}

impl RpsChoice {
    /// Whether `self` defeats `other` (rock > scissors > paper > rock).
    pub fn beats(self, other: RpsChoice) -> bool {
        matches!(
            (self, other),
            (RpsChoice::Rock, RpsChoice::Scissors)
                | (RpsChoice::Scissors, RpsChoice::Paper)
                | (RpsChoice::Paper, RpsChoice::Rock)
        )
    }
}

/// Count votes per entry id. The result does not depend on input order.
pub fn tally_votes<'a, I>(votes: I) -> HashMap<String, u32>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut counts = HashMap::new();
    for entry_id in votes {
        *counts.entry(entry_id.clone()).or_insert(0) += 1;
    }
    counts
}

/// Entries holding the maximum vote count, ties included, sorted by id.
/// Empty when nobody voted.
pub fn pick_top_entries(counts: &HashMap<String, u32>) -> Vec<String> {
    let Some(&max) = counts.values().max() else {
        return Vec::new();
    };
    if max == 0 {
        return Vec::new();
    }
    let mut top: Vec<String> = counts
        .iter()
        .filter(|(_, count)| **count == max)
        .map(|(id, _)| id.clone())
        .collect();
    top.sort();
    top
}

/// Uniform pick among `candidates`. `None` only for an empty slice.
pub fn pick_uniform(candidates: &[String], rng: &mut dyn RandomSource) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let idx = rng.pick_index(candidates.len()).min(candidates.len() - 1);
    Some(candidates[idx].clone())
}

/// Resolve a tiebreak once every tied entry has a recorded choice.
///
/// Returns `None` while any entry is still missing a choice. With one
/// distinct choice, or all three, the winner is drawn uniformly from every
/// participant. With exactly two distinct choices the winning choice is
/// decided by [`RpsChoice::beats`] and the winner is drawn from its holders.
pub fn resolve_rps(
    entry_ids: &[String],
    choices: &HashMap<String, RpsChoice>,
    rng: &mut dyn RandomSource,
) -> Option<String> {
    if entry_ids.is_empty() || entry_ids.iter().any(|id| !choices.contains_key(id)) {
        return None;
    }

    let distinct: BTreeSet<RpsChoice> = entry_ids.iter().map(|id| choices[id]).collect();
    if distinct.len() != 2 {
        return pick_uniform(entry_ids, rng);
    }

    let mut pair = distinct.into_iter();
    let (a, b) = match (pair.next(), pair.next()) {
        (Some(a), Some(b)) => (a, b),
        _ => return pick_uniform(entry_ids, rng),
    };
    let winning = if a.beats(b) { a } else { b };
    let holders: Vec<String> = entry_ids
        .iter()
        .filter(|id| choices[*id] == winning)
        .cloned()
        .collect();

    if holders.is_empty() {
        pick_uniform(entry_ids, rng)
    } else {
        pick_uniform(&holders, rng)
    }
}
