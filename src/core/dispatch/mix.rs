//! Deterministic profile-mix generation.
//!
//! Given per-profile weights and a target count, the mix is the
//! largest-remainder apportionment of the weights, shuffled with a
//! seeded generator. Same weights, count, and seed always produce the
//! same sequence.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::Result;
use crate::error::LoadtraceError;

/// Parse a `name=weight,name=weight` mix specification.
pub fn parse_mix_spec(spec: &str) -> Result<BTreeMap<String, f64>> {
    let mut weights = BTreeMap::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, weight) = part.split_once('=').ok_or_else(|| {
            LoadtraceError::config(format!("invalid mix entry: {part} (expected name=weight)"))
        })?;
        let weight: f64 = weight.trim().parse().map_err(|_| {
            LoadtraceError::config(format!("invalid mix weight in entry: {part}"))
        })?;
        if weight <= 0.0 {
            return Err(LoadtraceError::config(format!(
                "mix weight must be positive: {part}"
            )));
        }
        weights.insert(name.trim().to_string(), weight);
    }
    if weights.is_empty() {
        return Err(LoadtraceError::config("empty mix specification"));
    }
    Ok(weights)
}

/// Build the shuffled multiset of profile names.
///
/// Counts come from largest-remainder apportionment (ties broken by
/// name), so the realized mix tracks the weights as closely as an
/// integer split can.
pub fn build_mix(weights: &BTreeMap<String, f64>, total: usize, seed: u64) -> Result<Vec<String>> {
    if weights.is_empty() || total == 0 {
        return Err(LoadtraceError::config("mix requires weights and a positive total"));
    }
    let weight_sum: f64 = weights.values().sum();
    if weight_sum <= 0.0 {
        return Err(LoadtraceError::config("mix weights must sum to a positive value"));
    }

    let mut counts: Vec<(String, usize, f64)> = weights
        .iter()
        .map(|(name, w)| {
            let exact = w / weight_sum * total as f64;
            (name.clone(), exact.floor() as usize, exact - exact.floor())
        })
        .collect();
    let assigned: usize = counts.iter().map(|(_, c, _)| c).sum();
    let mut remainder = total - assigned;
    // Largest fractional part first; BTreeMap iteration already fixed
    // the name order for ties.
    counts.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    for entry in counts.iter_mut() {
        if remainder == 0 {
            break;
        }
        entry.1 += 1;
        remainder -= 1;
    }

    let mut mix = Vec::with_capacity(total);
    counts.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, count, _) in counts {
        mix.extend(std::iter::repeat_n(name, count));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    mix.shuffle(&mut rng);
    Ok(mix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(n, w)| (n.to_string(), *w)).collect()
    }

    #[test]
    fn test_parse_mix_spec() {
        let parsed = parse_mix_spec("fast=3, slow=1").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["fast"], 3.0);
        assert!(parse_mix_spec("fast").is_err());
        assert!(parse_mix_spec("fast=-1").is_err());
        assert!(parse_mix_spec("").is_err());
    }

    #[test]
    fn test_counts_follow_weights() {
        let mix = build_mix(&weights(&[("a", 3.0), ("b", 1.0)]), 8, 7).unwrap();
        assert_eq!(mix.len(), 8);
        assert_eq!(mix.iter().filter(|p| p.as_str() == "a").count(), 6);
        assert_eq!(mix.iter().filter(|p| p.as_str() == "b").count(), 2);
    }

    #[test]
    fn test_remainder_distribution() {
        // 1/1/1 over 4: one profile gets the extra slot, deterministically.
        let mix = build_mix(&weights(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]), 4, 0).unwrap();
        assert_eq!(mix.len(), 4);
        for name in ["a", "b", "c"] {
            let count = mix.iter().filter(|p| p.as_str() == name).count();
            assert!((1..=2).contains(&count));
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let w = weights(&[("a", 2.0), ("b", 1.0)]);
        let first = build_mix(&w, 30, 42).unwrap();
        let second = build_mix(&w, 30, 42).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_different_seed_usually_differs() {
        let w = weights(&[("a", 1.0), ("b", 1.0)]);
        let first = build_mix(&w, 40, 1).unwrap();
        let second = build_mix(&w, 40, 2).unwrap();
        // Counts match even when order differs.
        assert_ne!(first, second);
        assert_eq!(
            first.iter().filter(|p| p.as_str() == "a").count(),
            second.iter().filter(|p| p.as_str() == "a").count()
        );
    }
}
