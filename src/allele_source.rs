//! Per-position allele counts and the arena of candidates waiting to be called

use crate::allele::{AlleleType, CandidateAllele, NUM_ALLELE_TYPES};
use crate::read::{CigarOp, DirectionType, Read, NUM_DIRECTIONS};
use std::collections::{BTreeMap, HashSet};

type PositionCounts = [[u32; NUM_DIRECTIONS]; NUM_ALLELE_TYPES];

/// Counts the caller reads while scoring, and the sink for work deferred to a
/// later batch
pub trait AlleleCountSource {
    fn get_allele_count(&self, position: u32, allele_type: AlleleType, direction: DirectionType) -> u32;

    /// Reference observations at `position` already attributed to a gapped MNV
    fn get_gapped_mnv_ref_count(&self, position: u32) -> u32;

    /// Take ownership of candidates that must be resolved by a later batch
    fn add_candidates(&mut self, candidates: Vec<CandidateAllele>);

    fn add_gapped_mnv_ref_count(&mut self, counts: &BTreeMap<u32, u32>);
}

/// Hand back to the source every candidate whose counts are not final at
/// `max_cleared_position`, together with everything else at its position;
/// returns the candidates that can be called now.
pub fn defer_uncleared(
    candidates: Vec<CandidateAllele>,
    source: &mut dyn AlleleCountSource,
    max_cleared_position: Option<u32>,
) -> Vec<CandidateAllele> {
    let Some(max_cleared) = max_cleared_position else {
        return candidates;
    };
    let held: HashSet<u32> = candidates
        .iter()
        .filter(|candidate| candidate.last_counted_position() > max_cleared)
        .map(|candidate| candidate.position)
        .collect();
    let (ready, deferred): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|candidate| !held.contains(&candidate.position));
    if !deferred.is_empty() {
        source.add_candidates(deferred);
    }
    ready
}

/// Count source backed by ordered maps, filled from reads as they stream past
#[derive(Debug, Default)]
pub struct InMemoryAlleleSource {
    min_base_quality: u8,
    counts: BTreeMap<u32, PositionCounts>,
    gapped_mnv_ref_counts: BTreeMap<u32, u32>,
    pending: BTreeMap<u32, Vec<CandidateAllele>>,
}

impl InMemoryAlleleSource {
    pub fn new(min_base_quality: u8) -> Self {
        Self {
            min_base_quality,
            ..Default::default()
        }
    }

    /// Record every aligned base of a read. Bases under the quality cutoff
    /// count as `N`; deleted positions count as deletions.
    pub fn add_read_counts(&mut self, read: &Read) {
        let mut read_index = 0usize;
        let mut position = read.position;

        for op in &read.cigar {
            let len = op.len();
            match op {
                CigarOp::Match(_) => {
                    for i in 0..len as usize {
                        let ri = read_index + i;
                        if ri >= read.sequence.len() {
                            break;
                        }
                        let allele_type = if read.qualities[ri] < self.min_base_quality {
                            AlleleType::N
                        } else {
                            AlleleType::from_base(read.sequence[ri])
                        };
                        self.add_allele_count(position + i as u32, allele_type, read.direction_map[ri], 1);
                    }
                }
                CigarOp::Del(_) => {
                    let anchor = read_index.saturating_sub(1).min(read.direction_map.len().saturating_sub(1));
                    if let Some(&direction) = read.direction_map.get(anchor) {
                        for i in 0..len {
                            self.add_allele_count(position + i, AlleleType::Deletion, direction, 1);
                        }
                    }
                }
                _ => {}
            }
            if op.consumes_read() {
                read_index += len as usize;
            }
            if op.consumes_reference() {
                position += len;
            }
        }
    }

    pub fn add_allele_count(&mut self, position: u32, allele_type: AlleleType, direction: DirectionType, count: u32) {
        let entry = self.counts.entry(position).or_insert([[0; NUM_DIRECTIONS]; NUM_ALLELE_TYPES]);
        entry[allele_type.index()][direction.index()] += count;
    }

    /// Add one candidate, merging it into an identical pending one
    pub fn add_candidate(&mut self, candidate: CandidateAllele) {
        let at_position = self.pending.entry(candidate.position).or_default();
        match at_position.iter_mut().find(|c| c.same_identity(&candidate)) {
            Some(existing) => existing.absorb(&candidate),
            None => at_position.push(candidate),
        }
    }

    /// Move out every pending candidate at or before `through`, or all of them
    pub fn take_candidates_through(&mut self, through: Option<u32>) -> Vec<CandidateAllele> {
        let taken = match through {
            Some(through) => {
                let remaining = self.pending.split_off(&through.saturating_add(1));
                std::mem::replace(&mut self.pending, remaining)
            }
            None => std::mem::take(&mut self.pending),
        };
        taken.into_values().flatten().collect()
    }

    /// Lowest position holding a pending candidate
    pub fn first_pending_position(&self) -> Option<u32> {
        self.pending.keys().next().copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Positions in `[start, end]` with at least one recorded observation
    pub fn covered_positions(&self, start: u32, end: u32) -> Vec<u32> {
        if start > end {
            return Vec::new();
        }
        self.counts
            .range(start..=end)
            .filter(|(_, counts)| counts.iter().flatten().any(|&c| c > 0))
            .map(|(&position, _)| position)
            .collect()
    }

    /// Drop counts at or before `position`
    pub fn clear_through(&mut self, position: u32) {
        let next = position.saturating_add(1);
        self.counts = self.counts.split_off(&next);
        self.gapped_mnv_ref_counts = self.gapped_mnv_ref_counts.split_off(&next);
    }
}

impl AlleleCountSource for InMemoryAlleleSource {
    fn get_allele_count(&self, position: u32, allele_type: AlleleType, direction: DirectionType) -> u32 {
        self.counts
            .get(&position)
            .map_or(0, |counts| counts[allele_type.index()][direction.index()])
    }

    fn get_gapped_mnv_ref_count(&self, position: u32) -> u32 {
        self.gapped_mnv_ref_counts.get(&position).copied().unwrap_or(0)
    }

    fn add_candidates(&mut self, candidates: Vec<CandidateAllele>) {
        for candidate in candidates {
            self.add_candidate(candidate);
        }
    }

    fn add_gapped_mnv_ref_count(&mut self, counts: &BTreeMap<u32, u32>) {
        for (&position, &count) in counts {
            *self.gapped_mnv_ref_counts.entry(position).or_insert(0) += count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele::AlleleCategory;

    #[test]
    fn test_read_counts() {
        let mut quals = vec![30u8; 8];
        quals[1] = 5;
        let read = Read::with_direction("chr1", 10, "ACGTGTAC", quals, "4M2D4M", DirectionType::Reverse).unwrap();

        let mut source = InMemoryAlleleSource::new(20);
        source.add_read_counts(&read);

        assert_eq!(source.get_allele_count(10, AlleleType::A, DirectionType::Reverse), 1);
        assert_eq!(source.get_allele_count(11, AlleleType::C, DirectionType::Reverse), 0);
        assert_eq!(source.get_allele_count(11, AlleleType::N, DirectionType::Reverse), 1);
        assert_eq!(source.get_allele_count(14, AlleleType::Deletion, DirectionType::Reverse), 1);
        assert_eq!(source.get_allele_count(15, AlleleType::Deletion, DirectionType::Reverse), 1);
        assert_eq!(source.get_allele_count(16, AlleleType::G, DirectionType::Reverse), 1);
        assert_eq!(source.get_allele_count(16, AlleleType::G, DirectionType::Forward), 0);
        assert_eq!(source.covered_positions(1, 100), (10..=19).collect::<Vec<_>>());
    }

    #[test]
    fn test_pending_candidates_merge_and_drain() {
        let mut source = InMemoryAlleleSource::new(20);
        let mut first = CandidateAllele::new("chr1", 5, "A", "T", AlleleCategory::Snv).unwrap();
        first.add_support(DirectionType::Forward, false);
        let mut second = first.clone();
        second.add_support(DirectionType::Reverse, false);
        let mut later = CandidateAllele::new("chr1", 50, "C", "G", AlleleCategory::Snv).unwrap();
        later.add_support(DirectionType::Forward, false);

        source.add_candidates(vec![first, second, later]);
        assert_eq!(source.pending_count(), 2);

        let batch = source.take_candidates_through(Some(10));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].support(), 3);
        assert_eq!(source.pending_count(), 1);

        let rest = source.take_candidates_through(None);
        assert_eq!(rest.len(), 1);
        assert_eq!(source.pending_count(), 0);
    }

    #[test]
    fn test_gapped_counts_accumulate_and_clear() {
        let mut source = InMemoryAlleleSource::new(20);
        let counts: BTreeMap<u32, u32> = [(7, 2), (9, 1)].into_iter().collect();
        source.add_gapped_mnv_ref_count(&counts);
        source.add_gapped_mnv_ref_count(&counts);
        assert_eq!(source.get_gapped_mnv_ref_count(7), 4);
        assert_eq!(source.get_gapped_mnv_ref_count(8), 0);

        source.add_allele_count(8, AlleleType::A, DirectionType::Forward, 3);
        source.clear_through(8);
        assert_eq!(source.get_gapped_mnv_ref_count(7), 0);
        assert_eq!(source.get_gapped_mnv_ref_count(9), 2);
        assert_eq!(source.get_allele_count(8, AlleleType::A, DirectionType::Forward), 0);
    }

    #[test]
    fn test_defer_uncleared_uses_spanned_end() {
        let mut source = InMemoryAlleleSource::new(20);
        let snv = CandidateAllele::new("chr1", 9, "A", "T", AlleleCategory::Snv).unwrap();
        let deletion = CandidateAllele::new("chr1", 8, "ACGTAC", "A", AlleleCategory::Deletion).unwrap();
        let insertion = CandidateAllele::new("chr1", 10, "A", "AG", AlleleCategory::Insertion).unwrap();
        let beside_insertion = CandidateAllele::new("chr1", 10, "A", "C", AlleleCategory::Snv).unwrap();

        let ready = defer_uncleared(
            vec![snv.clone(), deletion, insertion, beside_insertion],
            &mut source,
            Some(10),
        );
        assert_eq!(ready, vec![snv]);
        assert_eq!(source.pending_count(), 3);
        assert_eq!(source.first_pending_position(), Some(8));

        let everything = source.take_candidates_through(None);
        assert_eq!(defer_uncleared(everything, &mut source, None).len(), 3);
        assert_eq!(source.pending_count(), 0);
    }
}
