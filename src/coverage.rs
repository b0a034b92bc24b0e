//! Depth and reference support of called alleles

use crate::allele::{AlleleCategory, AlleleType, CalledAllele, CandidateAllele, Coverage, DirectionCounts};
use crate::allele_source::AlleleCountSource;
use crate::config::CoverageConfig;
use crate::read::{DirectionType, NUM_DIRECTIONS};

#[derive(Debug, Clone, Copy, Default)]
struct PointCoverage {
    by_direction: DirectionCounts,
    no_calls: u32,
}

impl PointCoverage {
    /// Hand stitched coverage to the strands, odd remainder going forward
    fn split_stitched(mut self) -> Self {
        let stitched = self.by_direction[DirectionType::Stitched.index()];
        self.by_direction[DirectionType::Forward.index()] += (stitched + 1) / 2;
        self.by_direction[DirectionType::Reverse.index()] += stitched / 2;
        self.by_direction[DirectionType::Stitched.index()] = 0;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CoverageCalculator {
    contributing_types: Vec<AlleleType>,
}

impl CoverageCalculator {
    pub fn new(config: &CoverageConfig) -> Self {
        let mut contributing_types = AlleleType::BASES.to_vec();
        if config.include_deletions {
            contributing_types.push(AlleleType::Deletion);
        }
        Self { contributing_types }
    }

    /// Replace the coverage block of `allele`
    pub fn compute(&self, allele: &mut CalledAllele, source: &dyn AlleleCountSource) {
        allele.coverage = self.coverage_for(allele, source);
    }

    pub fn coverage_for(&self, allele: &CalledAllele, source: &dyn AlleleCountSource) -> Coverage {
        let length = allele.length() as u32;
        let position = allele.position;
        match allele.category {
            AlleleCategory::Deletion => {
                self.spanning_coverage(allele, source, position + 1, position + length, true)
            }
            AlleleCategory::Mnv => {
                self.spanning_coverage(allele, source, position, position + length - 1, true)
            }
            AlleleCategory::Insertion => {
                self.spanning_coverage(allele, source, position, position + 1, false)
            }
            AlleleCategory::Snv | AlleleCategory::Reference => self.point_coverage(allele, source),
        }
    }

    /// Frequency a candidate would have if called against the current counts
    pub fn live_frequency(&self, candidate: &CandidateAllele, source: &dyn AlleleCountSource) -> f64 {
        let mut allele = CalledAllele::from_candidate(candidate.clone());
        self.compute(&mut allele, source);
        allele.frequency()
    }

    fn counts_at(&self, position: u32, source: &dyn AlleleCountSource) -> PointCoverage {
        let mut point = PointCoverage::default();
        for direction in DirectionType::ALL {
            point.by_direction[direction.index()] = self
                .contributing_types
                .iter()
                .map(|&allele_type| source.get_allele_count(position, allele_type, direction))
                .sum();
            point.no_calls += source.get_allele_count(position, AlleleType::N, direction);
        }
        point
    }

    fn point_coverage(&self, allele: &CalledAllele, source: &dyn AlleleCountSource) -> Coverage {
        let point = self.counts_at(allele.position, source);
        let reference_type = AlleleType::from_base(allele.reference.as_bytes()[0]);
        let reference_count: u32 = DirectionType::ALL
            .iter()
            .map(|&direction| source.get_allele_count(allele.position, reference_type, direction))
            .sum();
        let unclaimed_reference =
            reference_count.saturating_sub(source.get_gapped_mnv_ref_count(allele.position));

        let (allele_support, reference_support) = if allele.is_reference() {
            (unclaimed_reference, unclaimed_reference)
        } else {
            (allele.candidate_support(), unclaimed_reference)
        };

        Coverage {
            total_coverage: point.by_direction.iter().sum(),
            coverage_by_direction: point.by_direction,
            allele_support,
            reference_support,
            num_no_calls: point.no_calls,
        }
    }

    fn spanning_coverage(
        &self,
        allele: &CalledAllele,
        source: &dyn AlleleCountSource,
        first: u32,
        second: u32,
        anchored: bool,
    ) -> Coverage {
        let a = self.counts_at(first, source).split_stitched();
        let b = self.counts_at(second, source).split_stitched();
        let combine = |x: u32, y: u32| if anchored { (x + y) / 2 } else { x.min(y) };

        let mut by_direction = [0; NUM_DIRECTIONS];
        for i in 0..NUM_DIRECTIONS {
            by_direction[i] = combine(a.by_direction[i], b.by_direction[i]);
        }
        let total_coverage: u32 = by_direction.iter().sum();
        let allele_support = allele.candidate_support();

        Coverage {
            total_coverage,
            coverage_by_direction: by_direction,
            allele_support,
            reference_support: total_coverage.saturating_sub(allele_support),
            num_no_calls: combine(a.no_calls, b.no_calls),
        }
    }
}
