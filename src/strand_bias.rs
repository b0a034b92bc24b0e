//! Strand bias scoring of variant support

use crate::allele::{CalledAllele, DirectionCounts};
use crate::config::{StrandBiasConfig, StrandBiasModel};
use crate::math::{poisson_cdf, pooled_t_test, q_to_p};
use crate::read::DirectionType;

/// Support and error chances for one strand (or for all strands pooled)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StrandBiasStats {
    pub support: u32,
    pub coverage: u32,
    pub frequency: f64,
    pub chance_false_pos: f64,
    pub chance_var_freq_greater_than_zero: f64,
    pub chance_false_neg: f64,
}

impl StrandBiasStats {
    pub fn new(
        support: u32,
        coverage: u32,
        noise_frequency: f64,
        min_detectable_frequency: f64,
        model: StrandBiasModel,
    ) -> Self {
        let frequency = if coverage > 0 {
            (support as f64 / coverage as f64).min(1.0)
        } else {
            0.0
        };

        let (chance_var_freq_greater_than_zero, chance_false_pos, chance_false_neg) =
            if support == 0 {
                match model {
                    StrandBiasModel::Extended => {
                        let present = (1.0 - min_detectable_frequency).powi(coverage as i32);
                        (present, 1.0 - present, present)
                    }
                    StrandBiasModel::Poisson => (0.0, 1.0, 1.0),
                }
            } else {
                let expected_noise = noise_frequency * coverage as f64;
                let present = poisson_cdf(support as i64 - 1, expected_noise);
                let expected_detectable = min_detectable_frequency * coverage as f64;
                let false_neg = poisson_cdf(support as i64, expected_detectable);
                (present, 1.0 - present, false_neg)
            };

        Self {
            support,
            coverage,
            frequency,
            chance_false_pos,
            chance_var_freq_greater_than_zero,
            chance_false_neg,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrandBiasResults {
    pub forward_stats: StrandBiasStats,
    pub reverse_stats: StrandBiasStats,
    pub stitched_stats: StrandBiasStats,
    pub overall_stats: StrandBiasStats,
    pub bias_score: f64,
    /// `10 * log10(bias_score)`, negative infinity when unbiased
    pub gatk_bias_score: f64,
    pub bias_acceptable: bool,
    pub var_present_on_both_strands: bool,
    pub cov_present_on_both_strands: bool,
    pub test_score: f64,
    pub test_acceptable: bool,
}

impl Default for StrandBiasResults {
    fn default() -> Self {
        Self {
            forward_stats: StrandBiasStats::default(),
            reverse_stats: StrandBiasStats::default(),
            stitched_stats: StrandBiasStats::default(),
            overall_stats: StrandBiasStats::default(),
            bias_score: 0.0,
            gatk_bias_score: f64::NEG_INFINITY,
            bias_acceptable: true,
            var_present_on_both_strands: false,
            cov_present_on_both_strands: false,
            test_score: 0.0,
            test_acceptable: true,
        }
    }
}

/// Split stitched counts between the strands, odd remainder going forward
fn strand_counts(counts: &DirectionCounts) -> (u32, u32, u32) {
    let stitched = counts[DirectionType::Stitched.index()];
    let forward = counts[DirectionType::Forward.index()] + (stitched + 1) / 2;
    let reverse = counts[DirectionType::Reverse.index()] + stitched / 2;
    (forward, reverse, stitched)
}

#[derive(Debug, Clone)]
pub struct StrandBiasCalculator {
    config: StrandBiasConfig,
}

impl StrandBiasCalculator {
    pub fn new(config: StrandBiasConfig) -> Self {
        Self { config }
    }

    /// Replace the allele's strand bias block. `noise_quality` is the base-call
    /// quality the allele was scored against.
    pub fn compute(&self, allele: &mut CalledAllele, noise_quality: u32) {
        allele.strand_bias = self.results_for(
            &allele.support_by_direction,
            &allele.coverage.coverage_by_direction,
            noise_quality,
        );
    }

    pub fn results_for(
        &self,
        support: &DirectionCounts,
        coverage: &DirectionCounts,
        noise_quality: u32,
    ) -> StrandBiasResults {
        let noise_frequency = q_to_p(noise_quality as f64);
        let (fwd_support, rev_support, stitched_support) = strand_counts(support);
        let (fwd_coverage, rev_coverage, stitched_coverage) = strand_counts(coverage);

        let forward_stats = self.create_stats(fwd_support, fwd_coverage, noise_frequency);
        let reverse_stats = self.create_stats(rev_support, rev_coverage, noise_frequency);
        let stitched_stats = self.create_stats(stitched_support, stitched_coverage, noise_frequency);
        let overall_stats = self.create_stats(
            support.iter().sum(),
            coverage.iter().sum(),
            noise_frequency,
        );

        let var_present_on_both_strands = fwd_support > 0 && rev_support > 0;
        let cov_present_on_both_strands = fwd_coverage > 0 && rev_coverage > 0;

        let (bias_score, gatk_bias_score) = if cov_present_on_both_strands {
            let bias = bias_score(&forward_stats, &reverse_stats, &overall_stats);
            (bias, 10.0 * bias.log10())
        } else {
            (0.0, f64::NEG_INFINITY)
        };

        let mut bias_acceptable = bias_score < self.config.acceptance_criteria;
        if self.config.require_both_strands && cov_present_on_both_strands && !var_present_on_both_strands {
            bias_acceptable = false;
        }

        let test = pooled_t_test(
            fwd_support as f64,
            fwd_coverage as f64,
            rev_support as f64,
            rev_coverage as f64,
            self.config.t_test_alpha,
        );

        StrandBiasResults {
            forward_stats,
            reverse_stats,
            stitched_stats,
            overall_stats,
            bias_score,
            gatk_bias_score,
            bias_acceptable,
            var_present_on_both_strands,
            cov_present_on_both_strands,
            test_score: test.score,
            test_acceptable: !test.significant,
        }
    }

    pub fn create_stats(&self, support: u32, coverage: u32, noise_frequency: f64) -> StrandBiasStats {
        StrandBiasStats::new(
            support,
            coverage,
            noise_frequency,
            self.config.min_detectable_frequency,
            self.config.model,
        )
    }
}

fn bias_score(forward: &StrandBiasStats, reverse: &StrandBiasStats, overall: &StrandBiasStats) -> f64 {
    let overall_present = overall.chance_var_freq_greater_than_zero;
    if overall_present <= 0.0 {
        return 0.0;
    }
    let forward_biased = forward.chance_var_freq_greater_than_zero * reverse.chance_false_pos / overall_present;
    let reverse_biased = reverse.chance_var_freq_greater_than_zero * forward.chance_false_pos / overall_present;
    forward_biased.max(reverse_biased)
}
