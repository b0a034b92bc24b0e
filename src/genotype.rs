//! Genotype assignment at one locus

use crate::allele::{AlleleKey, CalledAllele, Genotype};
use crate::config::Ploidy;

pub trait GenotypeCalculator: Send {
    /// Assign genotype and genotype quality to the alleles at one position,
    /// returning the keys of alleles that should be dropped
    fn set_genotypes(&self, alleles: &mut [CalledAllele]) -> Vec<AlleleKey>;
}

/// Genotype calculator for the configured ploidy
pub fn calculator_for(ploidy: Ploidy, min_depth: u32) -> Box<dyn GenotypeCalculator> {
    match ploidy {
        Ploidy::Somatic => Box::new(SomaticGenotypeCalculator::new(min_depth)),
        Ploidy::Diploid => Box::new(DiploidGenotypeCalculator::new(min_depth)),
    }
}

/// Tumour-only genotyping: every variant that clears depth is 0/1
#[derive(Debug, Clone)]
pub struct SomaticGenotypeCalculator {
    min_depth: u32,
}

impl SomaticGenotypeCalculator {
    pub fn new(min_depth: u32) -> Self {
        Self { min_depth }
    }
}

impl GenotypeCalculator for SomaticGenotypeCalculator {
    fn set_genotypes(&self, alleles: &mut [CalledAllele]) -> Vec<AlleleKey> {
        for allele in alleles.iter_mut() {
            let enough_depth = allele.total_coverage() >= self.min_depth;
            allele.genotype = match (allele.is_reference(), enough_depth) {
                (true, true) => Genotype::HomozygousRef,
                (true, false) => Genotype::RefLikeNoCall,
                (false, true) => Genotype::HeterozygousAltRef,
                (false, false) => Genotype::AltLikeNoCall,
            };
            allele.genotype_qscore = allele.variant_qscore;
        }
        Vec::new()
    }
}

/// Diploid thresholding on allele frequency
#[derive(Debug, Clone)]
pub struct DiploidGenotypeCalculator {
    min_depth: u32,
    /// Minimum frequency for an allele to be part of the genotype
    min_het_frequency: f64,
    /// Frequency above which a single variant is homozygous
    min_hom_frequency: f64,
}

impl DiploidGenotypeCalculator {
    pub fn new(min_depth: u32) -> Self {
        Self {
            min_depth,
            min_het_frequency: 0.2,
            min_hom_frequency: 0.7,
        }
    }
}

impl GenotypeCalculator for DiploidGenotypeCalculator {
    fn set_genotypes(&self, alleles: &mut [CalledAllele]) -> Vec<AlleleKey> {
        let depth = alleles.iter().map(CalledAllele::total_coverage).max().unwrap_or(0);

        let mut variants: Vec<usize> = (0..alleles.len())
            .filter(|&i| !alleles[i].is_reference() && alleles[i].frequency() >= self.min_het_frequency)
            .collect();
        variants.sort_by(|&a, &b| {
            alleles[b]
                .allele_support()
                .cmp(&alleles[a].allele_support())
                .then_with(|| alleles[a].key().cmp(&alleles[b].key()))
        });

        let mut pruned = Vec::new();
        for (i, allele) in alleles.iter().enumerate() {
            if !allele.is_reference() && !variants.iter().take(2).any(|&v| v == i) {
                pruned.push(allele.key());
            }
        }

        let genotype = if depth < self.min_depth {
            if variants.is_empty() {
                Genotype::RefLikeNoCall
            } else {
                Genotype::AltLikeNoCall
            }
        } else {
            match variants.len() {
                0 => Genotype::HomozygousRef,
                1 if alleles[variants[0]].frequency() >= self.min_hom_frequency => Genotype::HomozygousAlt,
                1 => Genotype::HeterozygousAltRef,
                _ => Genotype::HeterozygousAlt1Alt2,
            }
        };

        let genotype_qscore = alleles
            .iter()
            .filter(|allele| !pruned.contains(&allele.key()))
            .map(|allele| allele.variant_qscore)
            .min()
            .unwrap_or(0);

        for allele in alleles.iter_mut() {
            allele.genotype = genotype;
            allele.genotype_qscore = genotype_qscore;
        }

        pruned
    }
}
