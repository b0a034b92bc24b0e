//! Forced-allele reconciliation at a single locus

use crate::allele::{CalledAllele, Genotype};
use crate::VcallerResult;

/// Genotype for a forced allele that no read supported, from what else was called at the locus
fn forced_genotype(called: &[CalledAllele]) -> Genotype {
    if called.is_empty() || called.iter().any(|allele| allele.genotype.is_no_call()) {
        Genotype::RefLikeNoCall
    } else if called.iter().all(CalledAllele::is_reference) {
        Genotype::HomozygousRef
    } else {
        Genotype::Others
    }
}

/// Make sure every forced (reference, alternate) pair is represented at `position`.
/// Pairs already called are kept as they are; the rest are appended as
/// zero-support alleles carrying the locus depth.
pub fn add_forced_alleles(
    position: u32,
    called: &mut Vec<CalledAllele>,
    forced_pairs: &[(String, String)],
    contig: &str,
) -> VcallerResult<()> {
    let mut remaining: Vec<&(String, String)> = forced_pairs.iter().collect();
    let multi_allelic = called.len() > 1;

    let mut max_depth = 0u32;
    let mut reference_support = 0u32;
    let mut alternate_support = 0u32;

    for allele in called.iter_mut() {
        let before = remaining.len();
        remaining.retain(|(reference, alternate)| {
            !(reference.eq_ignore_ascii_case(&allele.reference) && alternate.eq_ignore_ascii_case(&allele.alternate))
        });
        if remaining.len() < before && multi_allelic && allele.is_forced_to_report {
            allele.genotype = Genotype::Others;
        }

        max_depth = max_depth.max(allele.total_coverage());
        if allele.is_reference() {
            reference_support = reference_support.max(allele.allele_support());
        } else {
            reference_support = reference_support.max(allele.reference_support());
            alternate_support += allele.allele_support();
        }
    }

    if remaining.is_empty() {
        return Ok(());
    }

    let genotype = forced_genotype(called);
    let inferred_reference = if reference_support > 0 {
        reference_support
    } else {
        max_depth.saturating_sub(alternate_support)
    };

    for (reference, alternate) in remaining {
        let mut allele = CalledAllele::forced(contig, position, reference, alternate)?;
        allele.coverage.total_coverage = max_depth;
        allele.coverage.reference_support = inferred_reference;
        allele.genotype = genotype;
        called.push(allele);
    }

    Ok(())
}

/// Final per-locus pass after genotyping
pub trait LocusProcessor: Send {
    fn process(&self, alleles: &mut [CalledAllele]);
}

#[derive(Debug, Clone, Default)]
pub struct SomaticLocusProcessor;

impl LocusProcessor for SomaticLocusProcessor {
    fn process(&self, _alleles: &mut [CalledAllele]) {}
}

/// Gives every allele at a locus holding a forced allele one shared genotype
#[derive(Debug, Clone, Default)]
pub struct DiploidLocusProcessor;

impl LocusProcessor for DiploidLocusProcessor {
    fn process(&self, alleles: &mut [CalledAllele]) {
        if !alleles.iter().any(|allele| allele.is_forced_to_report) {
            return;
        }
        let observed: Vec<&CalledAllele> = alleles.iter().filter(|a| !a.is_forced_to_report).collect();

        let genotype = if observed.is_empty() || observed.iter().any(|a| a.genotype.is_no_call()) {
            Genotype::RefLikeNoCall
        } else if observed.iter().any(|a| a.is_reference()) {
            Genotype::HomozygousRef
        } else {
            Genotype::Others
        };
        let genotype_qscore = observed.iter().map(|a| a.genotype_qscore).min().unwrap_or(0);

        for allele in alleles.iter_mut() {
            allele.genotype = genotype;
            allele.genotype_qscore = genotype_qscore;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele::{AlleleCategory, CandidateAllele, FilterType};

    fn called(reference: &str, alternate: &str, coverage: u32, support: u32, genotype: Genotype) -> CalledAllele {
        let category = AlleleCategory::infer(reference, alternate).unwrap();
        let candidate = CandidateAllele::new("chr1", 10, reference, alternate, category).unwrap();
        let mut allele = CalledAllele::from_candidate(candidate);
        allele.coverage.total_coverage = coverage;
        allele.coverage.allele_support = support;
        allele.coverage.reference_support = if category == AlleleCategory::Reference {
            support
        } else {
            coverage - support
        };
        allele.genotype = genotype;
        allele
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(r, a)| (r.to_string(), a.to_string())).collect()
    }

    #[test]
    fn test_forced_allele_at_reference_locus() {
        let mut alleles = vec![called("G", "G", 50, 50, Genotype::HomozygousRef)];
        add_forced_alleles(10, &mut alleles, &pairs(&[("G", "GCT")]), "chr1").unwrap();

        assert_eq!(alleles.len(), 2);
        let forced = &alleles[1];
        assert_eq!(forced.alternate, "GCT");
        assert_eq!(forced.genotype, Genotype::HomozygousRef);
        assert_eq!(forced.filters, vec![FilterType::ForcedReport]);
        assert_eq!(forced.total_coverage(), 50);
        assert_eq!(forced.reference_support(), 50);
        assert_eq!(forced.allele_support(), 0);
    }

    #[test]
    fn test_already_called_pair_not_duplicated() {
        let mut alleles = vec![called("A", "T", 40, 10, Genotype::HeterozygousAltRef)];
        add_forced_alleles(10, &mut alleles, &pairs(&[("A", "T")]), "chr1").unwrap();
        assert_eq!(alleles.len(), 1);
        assert!(alleles[0].filters.is_empty());
    }

    #[test]
    fn test_forced_genotype_for_mixed_and_empty_loci() {
        let mut mixed = vec![called("A", "T", 40, 10, Genotype::HeterozygousAltRef)];
        add_forced_alleles(10, &mut mixed, &pairs(&[("A", "C")]), "chr1").unwrap();
        assert_eq!(mixed[1].genotype, Genotype::Others);
        assert_eq!(mixed[1].reference_support(), 30);

        let mut empty = Vec::new();
        add_forced_alleles(10, &mut empty, &pairs(&[("A", "C"), ("A", "AT")]), "chr1").unwrap();
        assert_eq!(empty.len(), 2);
        assert!(empty.iter().all(|a| a.genotype == Genotype::RefLikeNoCall));
        assert!(empty.iter().all(|a| a.total_coverage() == 0));
    }

    #[test]
    fn test_forced_match_at_multi_allelic_locus_is_others() {
        let mut forced = called("A", "C", 40, 1, Genotype::HeterozygousAltRef);
        forced.is_forced_to_report = true;
        let mut alleles = vec![called("A", "T", 40, 10, Genotype::HeterozygousAltRef), forced];
        add_forced_alleles(10, &mut alleles, &pairs(&[("A", "C")]), "chr1").unwrap();
        assert_eq!(alleles.len(), 2);
        assert_eq!(alleles[0].genotype, Genotype::HeterozygousAltRef);
        assert_eq!(alleles[1].genotype, Genotype::Others);
    }

    #[test]
    fn test_diploid_locus_processor() {
        let mut observed = called("A", "T", 40, 10, Genotype::HeterozygousAltRef);
        observed.genotype_qscore = 35;
        let mut forced = called("A", "C", 40, 0, Genotype::Others);
        forced.is_forced_to_report = true;
        let mut alleles = vec![observed, forced];

        DiploidLocusProcessor.process(&mut alleles);
        assert!(alleles.iter().all(|a| a.genotype == Genotype::Others));
        assert!(alleles.iter().all(|a| a.genotype_qscore == 35));

        let mut only_forced = vec![called("A", "C", 0, 0, Genotype::HomozygousRef)];
        only_forced[0].is_forced_to_report = true;
        DiploidLocusProcessor.process(&mut only_forced);
        assert_eq!(only_forced[0].genotype, Genotype::RefLikeNoCall);
        assert_eq!(only_forced[0].genotype_qscore, 0);

        let mut untouched = vec![called("A", "T", 40, 10, Genotype::HeterozygousAltRef)];
        DiploidLocusProcessor.process(&mut untouched);
        assert_eq!(untouched[0].genotype, Genotype::HeterozygousAltRef);
    }
}
