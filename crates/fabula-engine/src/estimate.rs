// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use fabula_model::Section;

/// Approximate token counting.
///
/// Implementations must be pure, deterministic, and total: no I/O, no
/// panics, and `estimate("") == 0`.  A vendor-specific counter can replace
/// the default behind this trait without changing any call signature.
pub trait TokenEstimator {
    fn estimate(&self, text: &str) -> usize;
}

/// Default estimator: `ceil(utf8_bytes / 4)`.
///
/// The 4-bytes-per-token ratio slightly overestimates for typical English
/// prose, which is the desirable direction for budget enforcement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteRatio;

impl ByteRatio {
    pub const BYTES_PER_TOKEN: usize = 4;
}

impl TokenEstimator for ByteRatio {
    fn estimate(&self, text: &str) -> usize {
        text.len().div_ceil(Self::BYTES_PER_TOKEN)
    }
}

/// Wraps any estimator with a running correction factor.
///
/// The factor is updated via an exponential moving average of the ratio
/// between API-reported input token counts and the local estimate, so the
/// approximation converges toward the vendor tokenizer for the current
/// workload.  Observation is the caller's accounting step and happens
/// outside any assembly call; `estimate` itself stays pure.
#[derive(Debug, Clone)]
pub struct Calibrated<E> {
    inner: E,
    factor: f32,
}

impl<E: TokenEstimator> Calibrated<E> {
    const EMA_ALPHA: f32 = 0.3;

    pub fn new(inner: E) -> Self {
        Self { inner, factor: 1.0 }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Fold one observed (API-reported, locally-estimated) pair into the
    /// correction factor.  Zero estimates are ignored.
    pub fn observe(&mut self, reported: usize, estimated: usize) {
        if estimated == 0 {
            return;
        }
        let ratio = reported as f32 / estimated as f32;
        self.factor = self.factor * (1.0 - Self::EMA_ALPHA) + ratio * Self::EMA_ALPHA;
    }
}

impl<E: TokenEstimator> TokenEstimator for Calibrated<E> {
    fn estimate(&self, text: &str) -> usize {
        let raw = self.inner.estimate(text);
        (raw as f32 * self.factor).ceil() as usize
    }
}

/// Total estimate for a section sequence.
///
/// Totals are per-section sums so that dropping a section frees exactly its
/// own estimate; the blank-line join separators of the final render are
/// covered by the ratio's overestimation bias.
pub fn estimate_sections(sections: &[Section], est: &dyn TokenEstimator) -> usize {
    sections.iter().map(|s| est.estimate(&s.text)).sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fabula_model::Category;

    #[test]
    fn empty_text_yields_zero() {
        assert_eq!(ByteRatio.estimate(""), 0);
    }

    #[test]
    fn four_bytes_per_token_rounds_up() {
        assert_eq!(ByteRatio.estimate("abcd"), 1);
        assert_eq!(ByteRatio.estimate("abcde"), 2);
        assert_eq!(ByteRatio.estimate(&"x".repeat(400)), 100);
    }

    #[test]
    fn multibyte_text_counts_bytes_not_chars() {
        // "åäö" is 6 UTF-8 bytes → 2 tokens
        assert_eq!(ByteRatio.estimate("åäö"), 2);
    }

    #[test]
    fn estimate_is_deterministic() {
        let text = "The drowned kingdom of Veldt lies beneath the glass sea.";
        assert_eq!(ByteRatio.estimate(text), ByteRatio.estimate(text));
    }

    #[test]
    fn section_totals_are_per_section_sums() {
        let sections = vec![
            Section::new("a", "A", "x".repeat(200), Category::Core),
            Section::new("b", "B", "x".repeat(200), Category::World),
        ];
        assert_eq!(estimate_sections(&sections, &ByteRatio), 100);
    }

    #[test]
    fn calibrated_starts_neutral() {
        let cal = Calibrated::new(ByteRatio);
        assert_eq!(cal.estimate(&"x".repeat(400)), 100);
    }

    #[test]
    fn calibration_converges_toward_reported_counts() {
        let mut cal = Calibrated::new(ByteRatio);
        // The vendor tokenizer consistently reports 50% more tokens.
        for _ in 0..20 {
            cal.observe(150, 100);
        }
        assert!(cal.factor() > 1.4, "factor was {}", cal.factor());
        assert!(cal.estimate(&"x".repeat(400)) > 140);
    }

    #[test]
    fn calibration_ignores_zero_estimates() {
        let mut cal = Calibrated::new(ByteRatio);
        cal.observe(100, 0);
        assert_eq!(cal.factor(), 1.0);
    }
}
