//! Candidate and called allele types

use crate::read::{DirectionType, NUM_DIRECTIONS};
use crate::strand_bias::StrandBiasResults;
use crate::{VcallerError, VcallerResult};
use std::fmt;

pub const NUM_ALLELE_TYPES: usize = 6;
pub const NUM_READ_COLLAPSED_TYPES: usize = 4;

/// Per-direction counts indexed by `DirectionType::index`
pub type DirectionCounts = [u32; NUM_DIRECTIONS];

/// Base-level observation type tracked by the allele count source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlleleType {
    A = 0,
    C = 1,
    G = 2,
    T = 3,
    N = 4,
    Deletion = 5,
}

impl AlleleType {
    pub const BASES: [AlleleType; 4] = [AlleleType::A, AlleleType::C, AlleleType::G, AlleleType::T];

    pub fn from_base(base: u8) -> AlleleType {
        match base.to_ascii_uppercase() {
            b'A' => AlleleType::A,
            b'C' => AlleleType::C,
            b'G' => AlleleType::G,
            b'T' => AlleleType::T,
            _ => AlleleType::N,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

fn shares_anchor(reference: &str, alternate: &str) -> bool {
    match (reference.as_bytes().first(), alternate.as_bytes().first()) {
        (Some(r), Some(a)) => r.eq_ignore_ascii_case(a),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlleleCategory {
    Reference,
    Snv,
    Mnv,
    Insertion,
    Deletion,
}

impl AlleleCategory {
    /// Infer the category implied by a reference/alternate pair
    pub fn infer(reference: &str, alternate: &str) -> VcallerResult<AlleleCategory> {
        let (r, a) = (reference.len(), alternate.len());
        if r == 0 || a == 0 {
            return Err(VcallerError::InvalidAllele(
                "Reference and alternate alleles must not be empty".to_string(),
            ));
        }
        let category = if r == a {
            if reference.eq_ignore_ascii_case(alternate) {
                if r != 1 {
                    return Err(VcallerError::InvalidAllele(format!(
                        "Reference allele {} longer than one base",
                        reference
                    )));
                }
                AlleleCategory::Reference
            } else if r == 1 {
                AlleleCategory::Snv
            } else {
                AlleleCategory::Mnv
            }
        } else if (r == 1 || a == 1) && !shares_anchor(reference, alternate) {
            return Err(VcallerError::InvalidAllele(format!(
                "Indel {}>{} does not share its anchor base",
                reference, alternate
            )));
        } else if r == 1 {
            AlleleCategory::Insertion
        } else if a == 1 {
            AlleleCategory::Deletion
        } else {
            return Err(VcallerError::InvalidAllele(format!(
                "Unsupported complex allele {}>{}",
                reference, alternate
            )));
        };
        Ok(category)
    }

    pub fn is_indel(self) -> bool {
        matches!(self, AlleleCategory::Insertion | AlleleCategory::Deletion)
    }

    pub fn is_snv_like(self) -> bool {
        matches!(self, AlleleCategory::Snv | AlleleCategory::Mnv)
    }

    /// Last reference position whose counts feed the coverage of an allele
    /// of this category starting at `position`
    pub fn last_counted_position(self, position: u32, reference: &str, alternate: &str) -> u32 {
        let length = allele_length(self, reference, alternate) as u32;
        match self {
            AlleleCategory::Reference | AlleleCategory::Snv => position,
            AlleleCategory::Mnv => position + length - 1,
            AlleleCategory::Insertion => position + 1,
            AlleleCategory::Deletion => position + length,
        }
    }

    fn is_consistent(self, reference: &str, alternate: &str) -> bool {
        let (r, a) = (reference.len(), alternate.len());
        match self {
            AlleleCategory::Reference => r == 1 && a == 1,
            AlleleCategory::Snv => r == 1 && a == 1,
            AlleleCategory::Mnv => r == a && r > 1,
            AlleleCategory::Insertion => r == 1 && a > 1 && shares_anchor(reference, alternate),
            AlleleCategory::Deletion => a == 1 && r > 1 && shares_anchor(reference, alternate),
        }
    }
}

impl fmt::Display for AlleleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlleleCategory::Reference => "Reference",
            AlleleCategory::Snv => "SNV",
            AlleleCategory::Mnv => "MNV",
            AlleleCategory::Insertion => "Insertion",
            AlleleCategory::Deletion => "Deletion",
        };
        write!(f, "{}", name)
    }
}

/// Reporting bucket for how the supporting read was collapsed upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCollapsedType {
    SimplexStitched = 0,
    SimplexNonStitched = 1,
    DuplexStitched = 2,
    DuplexNonStitched = 3,
}

impl ReadCollapsedType {
    pub fn classify(is_duplex: bool, direction: DirectionType) -> ReadCollapsedType {
        let stitched = direction == DirectionType::Stitched;
        match (is_duplex, stitched) {
            (true, true) => ReadCollapsedType::DuplexStitched,
            (true, false) => ReadCollapsedType::DuplexNonStitched,
            (false, true) => ReadCollapsedType::SimplexStitched,
            (false, false) => ReadCollapsedType::SimplexNonStitched,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Genotype {
    HomozygousRef,
    HeterozygousAltRef,
    HomozygousAlt,
    HeterozygousAlt1Alt2,
    RefLikeNoCall,
    AltLikeNoCall,
    Alt12LikeNoCall,
    RefAndNoCall,
    AltAndNoCall,
    HemizygousRef,
    HemizygousAlt,
    HemizygousNoCall,
    Others,
}

impl Genotype {
    pub fn is_no_call(self) -> bool {
        matches!(
            self,
            Genotype::RefLikeNoCall
                | Genotype::AltLikeNoCall
                | Genotype::Alt12LikeNoCall
                | Genotype::RefAndNoCall
                | Genotype::AltAndNoCall
                | Genotype::HemizygousNoCall
        )
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gt = match self {
            Genotype::HomozygousRef => "0/0",
            Genotype::HeterozygousAltRef => "0/1",
            Genotype::HomozygousAlt => "1/1",
            Genotype::HeterozygousAlt1Alt2 => "1/2",
            Genotype::RefLikeNoCall | Genotype::AltLikeNoCall | Genotype::Alt12LikeNoCall => "./.",
            Genotype::RefAndNoCall => "0/.",
            Genotype::AltAndNoCall => "1/.",
            Genotype::HemizygousRef => "0",
            Genotype::HemizygousAlt => "1",
            Genotype::HemizygousNoCall => ".",
            Genotype::Others => "./.",
        };
        write!(f, "{}", gt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterType {
    LowDepth,
    LowVariantQscore,
    LowVariantFrequency,
    StrandBias,
    LowGenotypeQuality,
    ForcedReport,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterType::LowDepth => "LowDP",
            FilterType::LowVariantQscore => "LowQ",
            FilterType::LowVariantFrequency => "LowVariantFreq",
            FilterType::StrandBias => "SB",
            FilterType::LowGenotypeQuality => "LowGQ",
            FilterType::ForcedReport => "ForcedReport",
        };
        write!(f, "{}", name)
    }
}

/// Identity of an allele: two observations with equal keys are the same variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlleleKey {
    pub contig: String,
    pub position: u32,
    pub category: AlleleCategory,
    pub reference: String,
    pub alternate: String,
}

fn allele_length(category: AlleleCategory, reference: &str, alternate: &str) -> usize {
    match category {
        AlleleCategory::Reference | AlleleCategory::Snv => 1,
        AlleleCategory::Mnv => reference.len(),
        AlleleCategory::Insertion => alternate.len() - 1,
        AlleleCategory::Deletion => reference.len() - 1,
    }
}

/// Unscored allele proposed from read evidence
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAllele {
    pub contig: String,
    /// 1-based position; indels are anchored one base before the event
    pub position: u32,
    pub reference: String,
    pub alternate: String,
    pub category: AlleleCategory,
    pub support_by_direction: DirectionCounts,
    pub well_anchored_support_by_direction: DirectionCounts,
    pub read_collapsed_counts: [u32; NUM_READ_COLLAPSED_TYPES],
    pub open_on_left: bool,
    pub open_on_right: bool,
    pub is_known: bool,
}

impl CandidateAllele {
    pub fn new(
        contig: &str,
        position: u32,
        reference: &str,
        alternate: &str,
        category: AlleleCategory,
    ) -> VcallerResult<Self> {
        if contig.is_empty() {
            return Err(VcallerError::InvalidAllele("Contig name is empty".to_string()));
        }
        if position == 0 {
            return Err(VcallerError::InvalidAllele(format!(
                "Position must be 1-based and positive for {}>{}",
                reference, alternate
            )));
        }
        if reference.is_empty() || alternate.is_empty() {
            return Err(VcallerError::InvalidAllele(format!(
                "Empty allele at {}:{}",
                contig, position
            )));
        }
        if !category.is_consistent(reference, alternate) {
            return Err(VcallerError::InvalidAllele(format!(
                "{}>{} is not a valid {} allele",
                reference, alternate, category
            )));
        }

        Ok(CandidateAllele {
            contig: contig.to_string(),
            position,
            reference: reference.to_ascii_uppercase(),
            alternate: alternate.to_ascii_uppercase(),
            category,
            support_by_direction: [0; NUM_DIRECTIONS],
            well_anchored_support_by_direction: [0; NUM_DIRECTIONS],
            read_collapsed_counts: [0; NUM_READ_COLLAPSED_TYPES],
            open_on_left: false,
            open_on_right: false,
            is_known: false,
        })
    }

    pub fn length(&self) -> usize {
        allele_length(self.category, &self.reference, &self.alternate)
    }

    /// Scoring must wait until every read covering this position has been added
    pub fn last_counted_position(&self) -> u32 {
        self.category
            .last_counted_position(self.position, &self.reference, &self.alternate)
    }

    pub fn support(&self) -> u32 {
        self.support_by_direction.iter().sum()
    }

    pub fn is_open(&self) -> bool {
        self.open_on_left || self.open_on_right
    }

    pub fn is_fully_anchored(&self) -> bool {
        !self.is_open()
    }

    pub fn key(&self) -> AlleleKey {
        AlleleKey {
            contig: self.contig.clone(),
            position: self.position,
            category: self.category,
            reference: self.reference.clone(),
            alternate: self.alternate.clone(),
        }
    }

    pub fn same_identity(&self, other: &CandidateAllele) -> bool {
        self.position == other.position
            && self.category == other.category
            && self.reference == other.reference
            && self.alternate == other.alternate
            && self.contig == other.contig
    }

    /// Record one supporting observation
    pub fn add_support(&mut self, direction: DirectionType, is_duplex: bool) {
        self.support_by_direction[direction.index()] += 1;
        if self.is_fully_anchored() {
            self.well_anchored_support_by_direction[direction.index()] += 1;
        }
        self.read_collapsed_counts[ReadCollapsedType::classify(is_duplex, direction).index()] += 1;
    }

    /// Additively merge another observation of a (possibly longer) variant into this one.
    /// Anchoring from either side wins.
    pub fn absorb(&mut self, other: &CandidateAllele) {
        for i in 0..NUM_DIRECTIONS {
            self.support_by_direction[i] += other.support_by_direction[i];
            self.well_anchored_support_by_direction[i] += other.well_anchored_support_by_direction[i];
        }
        for i in 0..NUM_READ_COLLAPSED_TYPES {
            self.read_collapsed_counts[i] += other.read_collapsed_counts[i];
        }
        self.open_on_left = self.open_on_left && other.open_on_left;
        self.open_on_right = self.open_on_right && other.open_on_right;
        self.is_known = self.is_known || other.is_known;
    }
}

/// Coverage block produced by one scoring pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coverage {
    pub total_coverage: u32,
    pub coverage_by_direction: DirectionCounts,
    pub allele_support: u32,
    pub reference_support: u32,
    pub num_no_calls: u32,
}

/// A scored, genotyped and filtered allele
#[derive(Debug, Clone, PartialEq)]
pub struct CalledAllele {
    pub contig: String,
    pub position: u32,
    pub reference: String,
    pub alternate: String,
    pub category: AlleleCategory,
    pub support_by_direction: DirectionCounts,
    pub well_anchored_support_by_direction: DirectionCounts,
    pub read_collapsed_counts: [u32; NUM_READ_COLLAPSED_TYPES],
    pub is_known: bool,
    pub coverage: Coverage,
    pub variant_qscore: u32,
    /// Estimated base-call quality used as the noise level when scoring
    pub noise_level_applied: u32,
    pub genotype: Genotype,
    pub genotype_qscore: u32,
    pub filters: Vec<FilterType>,
    pub strand_bias: StrandBiasResults,
    pub is_forced_to_report: bool,
}

impl CalledAllele {
    pub fn from_candidate(candidate: CandidateAllele) -> Self {
        let genotype = if candidate.category == AlleleCategory::Reference {
            Genotype::HomozygousRef
        } else {
            Genotype::HeterozygousAltRef
        };

        CalledAllele {
            contig: candidate.contig,
            position: candidate.position,
            reference: candidate.reference,
            alternate: candidate.alternate,
            category: candidate.category,
            support_by_direction: candidate.support_by_direction,
            well_anchored_support_by_direction: candidate.well_anchored_support_by_direction,
            read_collapsed_counts: candidate.read_collapsed_counts,
            is_known: candidate.is_known,
            coverage: Coverage::default(),
            variant_qscore: 0,
            noise_level_applied: 0,
            genotype,
            genotype_qscore: 0,
            filters: Vec::new(),
            strand_bias: StrandBiasResults::default(),
            is_forced_to_report: false,
        }
    }

    /// Zero-support allele required in the output regardless of thresholds
    pub fn forced(contig: &str, position: u32, reference: &str, alternate: &str) -> VcallerResult<Self> {
        let category = AlleleCategory::infer(reference, alternate)?;
        let candidate = CandidateAllele::new(contig, position, reference, alternate, category)?;
        let mut allele = CalledAllele::from_candidate(candidate);
        allele.is_forced_to_report = true;
        allele.add_filter(FilterType::ForcedReport);
        Ok(allele)
    }

    /// Convert back to a candidate so the support can be handed to a later batch
    pub fn to_candidate(&self) -> CandidateAllele {
        CandidateAllele {
            contig: self.contig.clone(),
            position: self.position,
            reference: self.reference.clone(),
            alternate: self.alternate.clone(),
            category: self.category,
            support_by_direction: self.support_by_direction,
            well_anchored_support_by_direction: self.well_anchored_support_by_direction,
            read_collapsed_counts: self.read_collapsed_counts,
            open_on_left: false,
            open_on_right: false,
            is_known: self.is_known,
        }
    }

    pub fn key(&self) -> AlleleKey {
        AlleleKey {
            contig: self.contig.clone(),
            position: self.position,
            category: self.category,
            reference: self.reference.clone(),
            alternate: self.alternate.clone(),
        }
    }

    pub fn length(&self) -> usize {
        allele_length(self.category, &self.reference, &self.alternate)
    }

    pub fn is_reference(&self) -> bool {
        self.category == AlleleCategory::Reference
    }

    /// Support observed in reads, before any coverage-based adjustment
    pub fn candidate_support(&self) -> u32 {
        self.support_by_direction.iter().sum()
    }

    pub fn allele_support(&self) -> u32 {
        self.coverage.allele_support
    }

    pub fn total_coverage(&self) -> u32 {
        self.coverage.total_coverage
    }

    pub fn reference_support(&self) -> u32 {
        self.coverage.reference_support
    }

    pub fn frequency(&self) -> f64 {
        if self.coverage.total_coverage == 0 {
            return 0.0;
        }
        (self.coverage.allele_support as f64 / self.coverage.total_coverage as f64).min(1.0)
    }

    pub fn add_filter(&mut self, filter: FilterType) {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
            self.filters.sort();
        }
    }

    /// Merge support from another observation (used when reallocating MNV support)
    pub fn add_support_from(&mut self, other: &CalledAllele) {
        for i in 0..NUM_DIRECTIONS {
            self.support_by_direction[i] += other.support_by_direction[i];
            self.well_anchored_support_by_direction[i] += other.well_anchored_support_by_direction[i];
        }
        for i in 0..NUM_READ_COLLAPSED_TYPES {
            self.read_collapsed_counts[i] += other.read_collapsed_counts[i];
        }
    }
}
