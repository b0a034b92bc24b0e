//! Scoring, filtering and genotyping of one batch of candidates

use crate::allele::{AlleleCategory, CalledAllele, CandidateAllele, FilterType};
use crate::allele_source::{defer_uncleared, AlleleCountSource};
use crate::collapser::VariantCollapser;
use crate::config::{CallerConfig, Ploidy, VariantCallerConfig};
use crate::coverage::CoverageCalculator;
use crate::genotype::GenotypeCalculator;
use crate::intervals::IntervalSet;
use crate::locus::{add_forced_alleles, DiploidLocusProcessor, LocusProcessor, SomaticLocusProcessor};
use crate::mnv_reallocator;
use crate::quality::QualityCalculator;
use crate::strand_bias::StrandBiasCalculator;
use crate::VcallerResult;
use log::debug;
use std::collections::{BTreeMap, HashSet};

/// Candidates ready to be called. Nothing past `max_cleared_position` is final:
/// unresolved work there goes back to the count source.
#[derive(Debug, Clone, Default)]
pub struct CandidateBatch {
    pub candidates: Vec<CandidateAllele>,
    pub max_cleared_position: Option<u32>,
}

impl CandidateBatch {
    pub fn new(candidates: Vec<CandidateAllele>, max_cleared_position: Option<u32>) -> Self {
        Self {
            candidates,
            max_cleared_position,
        }
    }
}

/// Reference observations inside MNVs, keyed by position. These bases were
/// counted as reference in the pileup but belong to the MNV.
fn gapped_mnv_reference_counts(alleles: &[CalledAllele]) -> BTreeMap<u32, u32> {
    let mut counts = BTreeMap::new();
    for allele in alleles.iter().filter(|a| a.category == AlleleCategory::Mnv) {
        let support = allele.candidate_support();
        if support == 0 {
            continue;
        }
        let matching = allele
            .reference
            .bytes()
            .zip(allele.alternate.bytes())
            .enumerate()
            .filter(|(_, (r, a))| r == a);
        for (offset, _) in matching {
            *counts.entry(allele.position + offset as u32).or_insert(0) += support;
        }
    }
    counts
}

/// Forced alleles wait for the same watermark as a candidate of that shape.
/// Malformed pairs are due at once so `add_forced_alleles` reports them.
fn forced_last_counted_position(position: u32, reference: &str, alternate: &str) -> u32 {
    AlleleCategory::infer(reference, alternate).map_or(position, |category| {
        category.last_counted_position(position, reference, alternate)
    })
}

pub struct AlleleCaller {
    contig: String,
    config: CallerConfig,
    collapser: Option<VariantCollapser>,
    coverage: CoverageCalculator,
    quality: QualityCalculator,
    strand_bias: StrandBiasCalculator,
    genotype_calculator: Box<dyn GenotypeCalculator>,
    locus_processor: Box<dyn LocusProcessor>,
    intervals: Option<IntervalSet>,
    forced_alleles: BTreeMap<u32, Vec<(String, String)>>,
}

impl AlleleCaller {
    pub fn new(contig: &str, config: &VariantCallerConfig, genotype_calculator: Box<dyn GenotypeCalculator>) -> Self {
        let collapser = config.collapser.enabled.then(|| {
            VariantCollapser::new(config.collapser.clone(), CoverageCalculator::new(&config.coverage))
        });
        let locus_processor: Box<dyn LocusProcessor> = match config.caller.ploidy {
            Ploidy::Somatic => Box::new(SomaticLocusProcessor),
            Ploidy::Diploid => Box::new(DiploidLocusProcessor),
        };

        Self {
            contig: contig.to_string(),
            config: config.caller.clone(),
            collapser,
            coverage: CoverageCalculator::new(&config.coverage),
            quality: QualityCalculator::new(config.quality.clone()),
            strand_bias: StrandBiasCalculator::new(config.strand_bias.clone()),
            genotype_calculator,
            locus_processor,
            intervals: None,
            forced_alleles: BTreeMap::new(),
        }
    }

    /// Only report alleles inside these intervals (forced alleles excepted)
    pub fn with_intervals(mut self, intervals: IntervalSet) -> Self {
        self.intervals = Some(intervals);
        self
    }

    /// Alleles that must appear in the output, as (reference, alternate) per position
    pub fn with_forced_alleles(mut self, forced_alleles: BTreeMap<u32, Vec<(String, String)>>) -> Self {
        self.forced_alleles = forced_alleles
            .into_iter()
            .map(|(position, pairs)| {
                let pairs = pairs
                    .into_iter()
                    .map(|(r, a)| (r.to_ascii_uppercase(), a.to_ascii_uppercase()))
                    .collect();
                (position, pairs)
            })
            .collect();
        self
    }

    pub fn with_known_variants(mut self, known_variants: HashSet<(u32, String, String)>) -> Self {
        self.collapser = self.collapser.map(|c| c.with_known_variants(known_variants));
        self
    }

    pub fn contig(&self) -> &str {
        &self.contig
    }

    /// Call one batch. Returns the final alleles by position, reference then
    /// alternate order within a position.
    pub fn call(
        &mut self,
        batch: CandidateBatch,
        source: &mut dyn AlleleCountSource,
    ) -> VcallerResult<BTreeMap<u32, Vec<CalledAllele>>> {
        let max_cleared = batch.max_cleared_position;
        let num_candidates = batch.candidates.len();

        let candidates = match &self.collapser {
            Some(collapser) => collapser.collapse(batch.candidates, source, max_cleared),
            None => defer_uncleared(batch.candidates, source, max_cleared),
        };

        let mut alleles = Vec::with_capacity(candidates.len());
        let mut failed_mnvs = Vec::new();
        for candidate in candidates {
            let mut allele = CalledAllele::from_candidate(candidate);
            self.score(&mut allele, &*source);
            if allele.category == AlleleCategory::Mnv && !self.is_callable(&allele) && !self.is_forced(&allele) {
                failed_mnvs.push(allele);
            } else {
                alleles.push(allele);
            }
        }

        if !failed_mnvs.is_empty() {
            debug!("Reallocating {} MNVs on {}", failed_mnvs.len(), self.contig);
            let deferred = mnv_reallocator::reallocate(failed_mnvs, &mut alleles, max_cleared)?;
            source.add_candidates(deferred);
        }

        let gapped = gapped_mnv_reference_counts(&alleles);
        if !gapped.is_empty() {
            source.add_gapped_mnv_ref_count(&gapped);
        }
        for allele in alleles.iter_mut() {
            self.score(allele, &*source);
        }

        let mut by_position: BTreeMap<u32, Vec<CalledAllele>> = BTreeMap::new();
        for mut allele in alleles {
            let reportable = self.is_callable(&allele) && self.in_intervals(allele.position);
            if !reportable {
                if !self.is_forced(&allele) {
                    continue;
                }
                allele.is_forced_to_report = true;
                allele.add_filter(FilterType::ForcedReport);
            }
            self.apply_filters(&mut allele);
            by_position.entry(allele.position).or_default().push(allele);
        }

        for (position, at_position) in by_position.iter_mut() {
            if at_position.iter().any(|a| !a.is_reference() && !a.is_forced_to_report) {
                at_position.retain(|a| !a.is_reference() || a.is_forced_to_report);
            }

            let pruned = self.genotype_calculator.set_genotypes(at_position);
            at_position.retain(|a| a.is_forced_to_report || !pruned.contains(&a.key()));

            if let Some(min_gq) = self.config.filters.min_genotype_qscore {
                for allele in at_position.iter_mut().filter(|a| a.genotype_qscore < min_gq) {
                    allele.add_filter(FilterType::LowGenotypeQuality);
                }
            }

            if let Some(pairs) = self.forced_alleles.remove(position) {
                add_forced_alleles(*position, at_position, &pairs, &self.contig)?;
            }
        }

        let due: Vec<u32> = match max_cleared {
            Some(max_cleared) => self
                .forced_alleles
                .range(..=max_cleared)
                .filter(|(&position, pairs)| {
                    pairs
                        .iter()
                        .all(|(r, a)| forced_last_counted_position(position, r, a) <= max_cleared)
                })
                .map(|(&position, _)| position)
                .collect(),
            None => self.forced_alleles.keys().copied().collect(),
        };
        for position in due {
            if let Some(pairs) = self.forced_alleles.remove(&position) {
                let at_position = by_position.entry(position).or_default();
                add_forced_alleles(position, at_position, &pairs, &self.contig)?;
            }
        }

        for at_position in by_position.values_mut() {
            at_position.sort_by(|a, b| {
                a.reference
                    .cmp(&b.reference)
                    .then_with(|| a.alternate.cmp(&b.alternate))
            });
            self.locus_processor.process(at_position);
        }
        by_position.retain(|_, at_position| !at_position.is_empty());

        debug!(
            "Called {} positions from {} candidates on {} (cleared through {:?})",
            by_position.len(),
            num_candidates,
            self.contig,
            max_cleared
        );

        Ok(by_position)
    }

    /// Replace every scoring block of the allele from the current counts
    fn score(&self, allele: &mut CalledAllele, source: &dyn AlleleCountSource) {
        self.coverage.compute(allele, source);
        if allele.allele_support() > 0 {
            self.quality.compute(allele, source);
            if !allele.is_reference() {
                let noise_quality = allele.noise_level_applied;
                self.strand_bias.compute(allele, noise_quality);
            }
        } else {
            allele.variant_qscore = 0;
            allele.noise_level_applied = self.quality.estimated_quality(allele, source);
        }
    }

    pub fn is_callable(&self, allele: &CalledAllele) -> bool {
        if allele.is_reference() {
            return true;
        }
        let coverage = allele.total_coverage();
        if coverage < self.config.min_coverage && !self.config.include_reference_calls {
            return false;
        }
        if coverage > 0 && allele.frequency() < self.config.min_frequency {
            return false;
        }
        allele.variant_qscore >= self.config.min_qscore
    }

    fn in_intervals(&self, position: u32) -> bool {
        self.intervals.as_ref().map_or(true, |set| set.contains(position))
    }

    fn is_forced(&self, allele: &CalledAllele) -> bool {
        self.forced_alleles.get(&allele.position).is_some_and(|pairs| {
            pairs
                .iter()
                .any(|(r, a)| *r == allele.reference && *a == allele.alternate)
        })
    }

    fn apply_filters(&self, allele: &mut CalledAllele) {
        let filters = &self.config.filters;
        if filters.min_depth.is_some_and(|depth| allele.total_coverage() < depth) {
            allele.add_filter(FilterType::LowDepth);
        }
        if filters.min_qscore.is_some_and(|q| allele.variant_qscore < q) {
            allele.add_filter(FilterType::LowVariantQscore);
        }
        if allele.is_reference() {
            return;
        }
        if filters.min_frequency.is_some_and(|f| allele.frequency() < f) {
            allele.add_filter(FilterType::LowVariantFrequency);
        }
        if filters.strand_bias && !allele.strand_bias.bias_acceptable {
            allele.add_filter(FilterType::StrandBias);
        }
    }
}
