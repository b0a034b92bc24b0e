//! Poisson variant quality scores

use crate::allele::{AlleleType, CalledAllele};
use crate::allele_source::AlleleCountSource;
use crate::config::{NoiseModel, QualityConfig};
use crate::math::{p_to_q, poisson_p_value, q_to_p};
use crate::read::DirectionType;

#[derive(Debug, Clone)]
pub struct QualityCalculator {
    config: QualityConfig,
}

impl QualityCalculator {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Score the allele against the noise level of its neighbourhood
    pub fn compute(&self, allele: &mut CalledAllele, source: &dyn AlleleCountSource) {
        let estimated_quality = self.estimated_quality(allele, source);
        allele.noise_level_applied = estimated_quality;
        allele.variant_qscore = self.qscore(allele.allele_support(), allele.total_coverage(), estimated_quality);
    }

    /// Phred score of seeing `support` or more errors in `coverage` bases.
    /// Support above coverage (insertions can do this) scores the maximum.
    pub fn qscore(&self, support: u32, coverage: u32, estimated_quality: u32) -> u32 {
        let max_q = self.config.max_qscore;
        if coverage == 0 || support == 0 {
            return 0;
        }
        if support > coverage {
            return max_q;
        }

        let expected_errors = coverage as f64 * q_to_p(estimated_quality as f64);
        let p = poisson_p_value(support, expected_errors);
        if p <= 0.0 {
            return max_q;
        }
        p_to_q(p).min(max_q as f64).round().max(0.0) as u32
    }

    pub fn estimated_quality(&self, allele: &CalledAllele, source: &dyn AlleleCountSource) -> u32 {
        let flat = self.config.estimated_base_quality;
        match self.config.noise_model {
            NoiseModel::Flat => flat,
            NoiseModel::Window => match self.window_noise(allele, source) {
                Some(noise) if noise > 0.0 => (p_to_q(noise).round() as u32).clamp(1, flat),
                _ => flat,
            },
        }
    }

    /// Mean fraction of non-majority bases around the allele, skipping the
    /// positions the allele itself covers
    fn window_noise(&self, allele: &CalledAllele, source: &dyn AlleleCountSource) -> Option<f64> {
        let start = allele.position.saturating_sub(self.config.noise_window).max(1);
        let allele_end = allele.position + allele.length().max(1) as u32 - 1;
        let end = allele_end.saturating_add(self.config.noise_window);

        let mut noise_sum = 0.0;
        let mut covered = 0u32;
        for position in (start..=end).filter(|p| *p < allele.position || *p > allele_end) {
            let counts: Vec<u32> = AlleleType::BASES
                .iter()
                .map(|&base| {
                    DirectionType::ALL
                        .iter()
                        .map(|&direction| source.get_allele_count(position, base, direction))
                        .sum()
                })
                .collect();
            let total: u32 = counts.iter().sum();
            if total == 0 {
                continue;
            }
            let majority = counts.iter().copied().max().unwrap_or(0);
            noise_sum += (total - majority) as f64 / total as f64;
            covered += 1;
        }

        if covered == 0 {
            None
        } else {
            Some(noise_sum / covered as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele::{AlleleCategory, CandidateAllele};
    use crate::allele_source::InMemoryAlleleSource;

    fn calculator() -> QualityCalculator {
        QualityCalculator::new(QualityConfig::default())
    }

    #[test]
    fn test_degenerate_inputs() {
        let calc = calculator();
        assert_eq!(calc.qscore(5, 0, 20), 0);
        assert_eq!(calc.qscore(0, 100, 20), 0);
        assert_eq!(calc.qscore(12, 10, 20), 100);
    }

    #[test]
    fn test_strong_support_reaches_max() {
        assert_eq!(calculator().qscore(20, 100, 20), 100);
    }

    #[test]
    fn test_weak_support() {
        // one error expected in 100 bases at Q20, two observed
        // P(X >= 2 | lambda = 1) = 1 - 2/e, about 0.264
        assert_eq!(calculator().qscore(2, 100, 20), 6);
    }

    #[test]
    fn test_monotonic_in_support() {
        let calc = calculator();
        let mut previous = 0;
        for support in 0..=100 {
            let q = calc.qscore(support, 100, 20);
            assert!(q >= previous);
            previous = q;
        }
    }

    #[test]
    fn test_window_noise_lowers_quality() {
        let mut source = InMemoryAlleleSource::new(20);
        for position in 90..=110 {
            source.add_allele_count(position, AlleleType::A, DirectionType::Forward, 90);
            source.add_allele_count(position, AlleleType::C, DirectionType::Forward, 10);
        }
        let candidate = CandidateAllele::new("chr1", 100, "A", "C", AlleleCategory::Snv).unwrap();
        let allele = CalledAllele::from_candidate(candidate);

        let window = QualityCalculator::new(QualityConfig {
            noise_model: NoiseModel::Window,
            noise_window: 10,
            ..QualityConfig::default()
        });
        assert_eq!(window.estimated_quality(&allele, &source), 10);
        assert_eq!(calculator().estimated_quality(&allele, &source), 20);

        let quiet = InMemoryAlleleSource::new(20);
        assert_eq!(window.estimated_quality(&allele, &quiet), 20);
    }
}
