//! Shared ranking math for every memory tier.
//!
//! Ranking combines semantic similarity, recency, and access frequency.
//! The similarity half follows `memory/store.rs`'s
//! hybrid 70 % embedding / 30 % keyword weighting; the recency/frequency
//! half is an Ebbinghaus-style exponential decay boosted by access count,
//! blended with similarity 60/40.

/// Decay time constant, in tier ticks (see `Tier::tick`). Chosen so a
/// record untouched for ~50 ticks has decayed to roughly `1/e` retention.
const DECAY_TAU: f64 = 50.0;

pub(super) fn keyword_score(query_words: &[String], content: &str) -> f32 {
    if query_words.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let matches = query_words
        .iter()
        .filter(|w| content_lower.contains(w.as_str()))
        .count();
    matches as f32 / query_words.len() as f32
}

pub(super) fn similarity_component(cosine: f32, keyword: f32) -> f32 {
    (0.7 * cosine + 0.3 * keyword).clamp(0.0, 1.0)
}

pub(super) fn retention_component(now: u64, last_access: u64, access_count: u32) -> f32 {
    let elapsed = now.saturating_sub(last_access) as f64;
    let decay = (-elapsed / DECAY_TAU).exp();
    let boost = 1.0 + (access_count as f64).ln_1p();
    (decay * boost).clamp(0.0, 4.0) as f32
}

pub(super) fn combined_score(similarity: f32, retention: f32) -> f32 {
    (0.6 * similarity + 0.4 * retention).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_score_counts_fraction_matched() {
        let words = vec!["alpha".to_string(), "missing".to_string()];
        assert_eq!(keyword_score(&words, "alpha beta"), 0.5);
    }

    #[test]
    fn retention_decays_with_elapsed_time() {
        let fresh = retention_component(10, 10, 0);
        let stale = retention_component(10_000, 10, 0);
        assert!(fresh > stale);
    }

    #[test]
    fn retention_rewards_access_frequency() {
        let rare = retention_component(10, 0, 0);
        let frequent = retention_component(10, 0, 20);
        assert!(frequent > rare);
    }
}
