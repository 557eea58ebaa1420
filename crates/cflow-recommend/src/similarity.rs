//! Sparse vector helpers over ordered maps.

use std::collections::{BTreeMap, BTreeSet};

/// Cosine similarity of two sparse vectors. Zero if either is empty or
/// all-zero.
#[must_use]
pub fn cosine(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(k, x)| large.get(k).map(|y| x * y))
        .sum();
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Cosine between a weighted profile and an unweighted tag set.
#[must_use]
pub fn tag_affinity(profile: &BTreeMap<String, f64>, tags: &BTreeSet<String>) -> f64 {
    if tags.is_empty() {
        return 0.0;
    }
    let norm_profile = norm(profile);
    if norm_profile <= 0.0 {
        return 0.0;
    }
    let dot: f64 = tags.iter().filter_map(|t| profile.get(t)).sum();
    #[allow(clippy::cast_precision_loss)]
    let norm_tags = (tags.len() as f64).sqrt();
    dot / (norm_profile * norm_tags)
}

/// Scale values into [0, 1] by the largest one. Non-positive maxima map
/// everything to zero.
#[must_use]
pub fn normalize_by_max(values: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let max = values.values().copied().fold(0.0_f64, f64::max);
    values
        .into_iter()
        .map(|(k, v)| {
            let scaled = if max > 0.0 { (v / max).max(0.0) } else { 0.0 };
            (k, scaled)
        })
        .collect()
}

fn norm(v: &BTreeMap<String, f64>) -> f64 {
    v.values().map(|x| x * x).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
    }

    #[test]
    fn cosine_identical_is_one() {
        let a = vector(&[("x", 1.0), ("y", 2.0)]);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_disjoint_is_zero() {
        let a = vector(&[("x", 1.0)]);
        let b = vector(&[("y", 1.0)]);
        assert!(cosine(&a, &b).abs() < 1e-12);
    }

    #[test]
    fn cosine_empty_is_zero() {
        assert!(cosine(&vector(&[("x", 1.0)]), &BTreeMap::new()).abs() < 1e-12);
    }

    #[test]
    fn tag_affinity_prefers_matching_tags() {
        let profile = vector(&[("rock", 3.0), ("jazz", 1.0)]);
        let rock = BTreeSet::from(["rock".to_owned()]);
        let jazz = BTreeSet::from(["jazz".to_owned()]);
        assert!(tag_affinity(&profile, &rock) > tag_affinity(&profile, &jazz));
        assert!(tag_affinity(&profile, &BTreeSet::new()).abs() < 1e-12);
    }

    #[test]
    fn normalize_scales_to_unit_max() {
        let scaled = normalize_by_max(vector(&[("a", 5.0), ("b", 10.0), ("c", 0.0)]));
        assert!((scaled["a"] - 0.5).abs() < 1e-12);
        assert!((scaled["b"] - 1.0).abs() < 1e-12);
        assert!(scaled["c"].abs() < 1e-12);
        assert!(normalize_by_max(vector(&[("a", 0.0)]))["a"].abs() < 1e-12);
    }
}
