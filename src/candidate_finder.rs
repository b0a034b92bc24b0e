//! Candidate extraction from the alignment operations of a single read

use crate::allele::{AlleleCategory, CandidateAllele};
use crate::config::FinderConfig;
use crate::read::{CigarOp, DirectionType, Read};
use crate::{VcallerError, VcallerResult};

/// MNV being accreted along a match run
#[derive(Debug)]
struct PendingMnv {
    /// Offset of the first base within the match run
    start: usize,
    reference: Vec<u8>,
    alternate: Vec<u8>,
    trailing_matches: usize,
    open_on_left: bool,
}

impl PendingMnv {
    fn new(start: usize, ref_base: u8, read_base: u8, open_on_left: bool) -> Self {
        Self {
            start,
            reference: vec![ref_base],
            alternate: vec![read_base],
            trailing_matches: 0,
            open_on_left,
        }
    }

    fn trimmed_len(&self) -> usize {
        self.reference.len() - self.trailing_matches
    }
}

/// Position of one match run inside the read and the reference
#[derive(Debug, Clone, Copy)]
struct MatchRun {
    read_index: usize,
    ref_index: usize,
    len: usize,
    is_first_op: bool,
    is_last_op: bool,
}

fn allele_string(bases: &[u8]) -> String {
    bases.iter().map(|&b| b.to_ascii_uppercase() as char).collect()
}

/// Direction credited to an allele spanning the bases between two anchors.
/// A stitched base anywhere in the span makes the allele stitched.
pub fn support_direction(read: &Read, left: usize, right: usize) -> VcallerResult<DirectionType> {
    let directions = &read.direction_map;
    if directions.is_empty() {
        return Err(VcallerError::InvalidRead(
            "Read has no direction information".to_string(),
        ));
    }
    let last = directions.len() - 1;
    let (left, right) = (left.min(last), right.min(last));

    if right > left + 1
        && directions[left + 1..right]
            .iter()
            .any(|&d| d == DirectionType::Stitched)
    {
        return Ok(DirectionType::Stitched);
    }

    let (start, end) = (directions[left], directions[right]);
    if start == end {
        return Ok(start);
    }
    if start == DirectionType::Stitched || end == DirectionType::Stitched {
        return Ok(DirectionType::Stitched);
    }

    Err(VcallerError::DirectionTransition {
        start,
        end,
        read_index: left,
    })
}

/// Finds candidate alleles in one aligned read. Holds no state between reads.
#[derive(Debug, Clone)]
pub struct CandidateVariantFinder {
    config: FinderConfig,
}

impl CandidateVariantFinder {
    pub fn new(config: FinderConfig) -> Self {
        Self { config }
    }

    pub fn find_candidates(
        &self,
        read: &Read,
        reference: &[u8],
        contig: &str,
    ) -> VcallerResult<Vec<CandidateAllele>> {
        let mut candidates = Vec::new();

        let (first_op, last_op) = match (read.first_aligned_op(), read.last_aligned_op()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(candidates),
        };

        let mut read_index = 0usize;
        let mut ref_index = (read.position - 1) as usize;

        for (op_index, op) in read.cigar.iter().enumerate() {
            let len = op.len() as usize;
            let is_first_op = op_index == first_op;
            let is_last_op = op_index == last_op;

            match op {
                CigarOp::Match(_) => {
                    let run = MatchRun {
                        read_index,
                        ref_index,
                        len,
                        is_first_op,
                        is_last_op,
                    };
                    self.process_match_run(read, reference, contig, run, &mut candidates)?;
                }
                CigarOp::Ins(_) => {
                    if let Some(insertion) = self.extract_insertion(
                        read, reference, contig, read_index, ref_index, len, is_first_op, is_last_op,
                    )? {
                        candidates.push(insertion);
                    }
                }
                CigarOp::Del(_) => {
                    if let Some(deletion) = self.extract_deletion(
                        read, reference, contig, read_index, ref_index, len, is_first_op, is_last_op,
                    )? {
                        candidates.push(deletion);
                    }
                }
                _ => {}
            }

            if op.consumes_read() {
                read_index += len;
            }
            if op.consumes_reference() {
                ref_index += len;
            }
        }

        Ok(candidates)
    }

    fn is_valid_base(&self, read: &Read, read_index: usize, ref_base: u8) -> bool {
        read.qualities[read_index] >= self.config.min_base_quality
            && read.sequence[read_index] != b'N'
            && ref_base != b'N'
    }

    fn process_match_run(
        &self,
        read: &Read,
        reference: &[u8],
        contig: &str,
        run: MatchRun,
        candidates: &mut Vec<CandidateAllele>,
    ) -> VcallerResult<()> {
        let mut pending: Option<PendingMnv> = None;
        let mut previous_invalid = false;

        for i in 0..run.len {
            let ri = run.read_index + i;
            let gi = run.ref_index + i;
            if gi >= reference.len() || ri >= read.sequence.len() {
                break;
            }

            let read_base = read.sequence[ri];
            let ref_base = reference[gi].to_ascii_uppercase();

            if !self.is_valid_base(read, ri, ref_base) {
                if let Some(mnv) = pending.take() {
                    candidates.push(self.emit_mnv(read, contig, run, mnv, true)?);
                }
                previous_invalid = true;
                continue;
            }

            if read_base == ref_base {
                if let Some(mnv) = pending.as_mut() {
                    if mnv.trailing_matches + 1 > self.config.max_intervening_ref {
                        if let Some(mnv) = pending.take() {
                            candidates.push(self.emit_mnv(read, contig, run, mnv, false)?);
                        }
                    } else {
                        mnv.trailing_matches += 1;
                        mnv.reference.push(ref_base);
                        mnv.alternate.push(read_base);
                    }
                }
                previous_invalid = false;
                continue;
            }

            // without MNV calling every mismatch starts its own SNV
            match pending.as_mut() {
                Some(mnv) if self.config.call_mnvs && mnv.reference.len() < self.config.max_mnv_length => {
                    mnv.reference.push(ref_base);
                    mnv.alternate.push(read_base);
                    mnv.trailing_matches = 0;
                }
                Some(_) => {
                    if let Some(full) = pending.take() {
                        candidates.push(self.emit_mnv(read, contig, run, full, false)?);
                    }
                    pending = Some(PendingMnv::new(i, ref_base, read_base, false));
                }
                None => {
                    pending = Some(PendingMnv::new(i, ref_base, read_base, previous_invalid));
                }
            }
            previous_invalid = false;
        }

        if let Some(mnv) = pending.take() {
            candidates.push(self.emit_mnv(read, contig, run, mnv, false)?);
        }

        Ok(())
    }

    fn emit_mnv(
        &self,
        read: &Read,
        contig: &str,
        run: MatchRun,
        mut mnv: PendingMnv,
        flushed_by_invalid_base: bool,
    ) -> VcallerResult<CandidateAllele> {
        let len = mnv.trimmed_len();
        mnv.reference.truncate(len);
        mnv.alternate.truncate(len);

        let position = (run.ref_index + mnv.start + 1) as u32;
        let category = if len == 1 {
            AlleleCategory::Snv
        } else {
            AlleleCategory::Mnv
        };

        let mut candidate = CandidateAllele::new(
            contig,
            position,
            &allele_string(&mnv.reference),
            &allele_string(&mnv.alternate),
            category,
        )?;
        candidate.open_on_left = mnv.open_on_left || (run.is_first_op && mnv.start == 0);
        candidate.open_on_right =
            flushed_by_invalid_base || (run.is_last_op && mnv.start + len == run.len);

        let first = run.read_index + mnv.start;
        let last = first + len - 1;
        let direction = if len == 1 {
            read.direction_map[first]
        } else {
            support_direction(read, first, last)?
        };
        candidate.add_support(direction, read.is_duplex);

        Ok(candidate)
    }

    #[allow(clippy::too_many_arguments)]
    fn extract_insertion(
        &self,
        read: &Read,
        reference: &[u8],
        contig: &str,
        read_index: usize,
        ref_index: usize,
        len: usize,
        is_first_op: bool,
        is_last_op: bool,
    ) -> VcallerResult<Option<CandidateAllele>> {
        if read_index == 0 || ref_index == 0 || ref_index > reference.len() {
            return Ok(None);
        }
        if len == 0 || read_index + len > read.sequence.len() {
            return Ok(None);
        }
        if read.qualities[read_index] < self.config.min_base_quality {
            return Ok(None);
        }

        let anchor = reference[ref_index - 1].to_ascii_uppercase();
        let mut alternate = vec![anchor];
        alternate.extend_from_slice(&read.sequence[read_index..read_index + len]);

        let mut candidate = CandidateAllele::new(
            contig,
            ref_index as u32,
            &allele_string(&[anchor]),
            &allele_string(&alternate),
            AlleleCategory::Insertion,
        )?;
        candidate.open_on_left = is_first_op;
        candidate.open_on_right = is_last_op;

        let direction = support_direction(read, read_index - 1, read_index + len)?;
        candidate.add_support(direction, read.is_duplex);

        Ok(Some(candidate))
    }

    #[allow(clippy::too_many_arguments)]
    fn extract_deletion(
        &self,
        read: &Read,
        reference: &[u8],
        contig: &str,
        read_index: usize,
        ref_index: usize,
        len: usize,
        is_first_op: bool,
        is_last_op: bool,
    ) -> VcallerResult<Option<CandidateAllele>> {
        if read_index == 0 || read_index >= read.sequence.len() || ref_index == 0 || len == 0 {
            return Ok(None);
        }
        if ref_index + len > reference.len() {
            return Ok(None);
        }
        let min_quality = self.config.min_base_quality;
        if read.qualities[read_index - 1] < min_quality || read.qualities[read_index] < min_quality {
            return Ok(None);
        }

        let deleted = &reference[ref_index - 1..ref_index + len];
        let mut candidate = CandidateAllele::new(
            contig,
            ref_index as u32,
            &allele_string(deleted),
            &allele_string(&deleted[..1]),
            AlleleCategory::Deletion,
        )?;
        candidate.open_on_left = is_first_op;
        candidate.open_on_right = is_last_op;

        let direction = support_direction(read, read_index - 1, read_index)?;
        candidate.add_support(direction, read.is_duplex);

        Ok(Some(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele::ReadCollapsedType;
    use crate::read::parse_cigar;

    const REFERENCE: &[u8] = b"ACGTACGTACGTACGTACGT";

    fn finder(call_mnvs: bool) -> CandidateVariantFinder {
        CandidateVariantFinder::new(FinderConfig {
            min_base_quality: 20,
            call_mnvs,
            max_mnv_length: 3,
            max_intervening_ref: 1,
        })
    }

    fn read(position: u32, sequence: &str, cigar: &str) -> Read {
        Read::with_direction(
            "chr1",
            position,
            sequence,
            vec![30; sequence.len()],
            cigar,
            DirectionType::Forward,
        )
        .unwrap()
    }

    fn alleles(candidates: &[CandidateAllele]) -> Vec<(u32, String, String, AlleleCategory)> {
        candidates
            .iter()
            .map(|c| (c.position, c.reference.clone(), c.alternate.clone(), c.category))
            .collect()
    }

    #[test]
    fn test_snvs_without_mnv_calling() {
        let r = read(1, "ACTTACATAC", "10M");
        let candidates = finder(false).find_candidates(&r, REFERENCE, "chr1").unwrap();

        assert_eq!(
            alleles(&candidates),
            vec![
                (3, "G".to_string(), "T".to_string(), AlleleCategory::Snv),
                (7, "G".to_string(), "A".to_string(), AlleleCategory::Snv),
            ]
        );
        assert!(candidates.iter().all(|c| c.is_fully_anchored()));
        assert!(candidates.iter().all(|c| c.support() == 1));
    }

    #[test]
    fn test_adjacent_mismatches_without_mnv_calling_do_not_overlap() {
        let r = read(1, "ACTAACGTAC", "10M");
        let candidates = finder(false).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].position, 3);
        assert_eq!(candidates[1].position, 4);
    }

    #[test]
    fn test_stitched_read_single_mismatch() {
        let r = Read::with_direction(
            "chr1",
            1,
            "ACGTTCGTAC",
            vec![35; 10],
            "10M",
            DirectionType::Stitched,
        )
        .unwrap();
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();

        assert_eq!(candidates.len(), 1);
        let snv = &candidates[0];
        assert_eq!((snv.position, snv.reference.as_str(), snv.alternate.as_str()), (5, "A", "T"));
        assert_eq!(snv.category, AlleleCategory::Snv);
        assert_eq!(snv.support_by_direction, [0, 0, 1]);
        assert_eq!(snv.read_collapsed_counts[ReadCollapsedType::SimplexStitched.index()], 1);
    }

    #[test]
    fn test_adjacent_mismatches_form_mnv() {
        let r = read(1, "ACTAACGTAC", "10M");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(
            alleles(&candidates),
            vec![(3, "GT".to_string(), "TA".to_string(), AlleleCategory::Mnv)]
        );
    }

    #[test]
    fn test_gapped_mnv() {
        let r = read(1, "ACTTCCGTAC", "10M");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(
            alleles(&candidates),
            vec![(3, "GTA".to_string(), "TTC".to_string(), AlleleCategory::Mnv)]
        );
    }

    #[test]
    fn test_mnv_length_capped() {
        let r = read(1, "ACCAGTGTAC", "10M");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(
            alleles(&candidates),
            vec![
                (3, "GTA".to_string(), "CAG".to_string(), AlleleCategory::Mnv),
                (6, "C".to_string(), "T".to_string(), AlleleCategory::Snv),
            ]
        );
        assert!(candidates.iter().all(|c| c.length() <= 3));
    }

    #[test]
    fn test_intervening_reference_limit() {
        // mismatches at offsets 2 and 5 separated by two matches
        let r = read(1, "ACTTAGGTAC", "10M");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(
            alleles(&candidates),
            vec![
                (3, "G".to_string(), "T".to_string(), AlleleCategory::Snv),
                (6, "C".to_string(), "G".to_string(), AlleleCategory::Snv),
            ]
        );
    }

    #[test]
    fn test_low_quality_base_flushes_open_mnv() {
        let mut quals = vec![30u8; 10];
        quals[3] = 10;
        let r = Read::with_direction("chr1", 1, "ACTTCCGTAC", quals, "10M", DirectionType::Forward)
            .unwrap();
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].position, 3);
        assert!(candidates[0].open_on_right);
        assert!(!candidates[0].open_on_left);
        assert_eq!(candidates[1].position, 5);
        assert!(candidates[1].open_on_left);
        assert_eq!(candidates[1].well_anchored_support_by_direction, [0, 0, 0]);
    }

    #[test]
    fn test_low_quality_base_opens_snv_in_both_modes() {
        let mut quals = vec![30u8; 10];
        quals[3] = 10;
        let r = Read::with_direction("chr1", 1, "ACTTACGTAC", quals, "10M", DirectionType::Forward)
            .unwrap();

        for call_mnvs in [true, false] {
            let candidates = finder(call_mnvs).find_candidates(&r, REFERENCE, "chr1").unwrap();
            assert_eq!(candidates.len(), 1);
            assert_eq!(candidates[0].position, 3);
            assert!(candidates[0].open_on_right);
            assert!(!candidates[0].open_on_left);
        }
    }

    #[test]
    fn test_read_edge_is_open() {
        let r = read(1, "TCGTACGTAA", "10M");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].open_on_left && !candidates[0].open_on_right);
        assert!(candidates[1].open_on_right && !candidates[1].open_on_left);

        let clipped = read(3, "GGTTACGTACGT", "2S10M");
        let candidates = finder(true).find_candidates(&clipped, REFERENCE, "chr1").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].position, 3);
        assert_eq!(candidates[0].reference, "G");
        assert!(candidates[0].open_on_left);
    }

    #[test]
    fn test_insertion() {
        let r = read(1, "ACGTGGACGT", "4M2I4M");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(
            alleles(&candidates),
            vec![(4, "T".to_string(), "TGG".to_string(), AlleleCategory::Insertion)]
        );
        assert!(candidates[0].is_fully_anchored());
        assert_eq!(candidates[0].length(), 2);
    }

    #[test]
    fn test_insertion_at_read_start_suppressed() {
        let r = read(1, "GGACGTACGT", "2I8M");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_low_quality_insertion_suppressed() {
        let mut quals = vec![30u8; 10];
        quals[4] = 5;
        let r = Read::with_direction("chr1", 1, "ACGTGGACGT", quals, "4M2I4M", DirectionType::Forward)
            .unwrap();
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_insertion_at_read_end_is_open() {
        let r = read(1, "ACGTGG", "4M2I");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].open_on_right);
        assert!(!candidates[0].open_on_left);
    }

    #[test]
    fn test_deletion() {
        let r = read(1, "ACGTGTAC", "4M2D4M");
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(
            alleles(&candidates),
            vec![(4, "TAC".to_string(), "T".to_string(), AlleleCategory::Deletion)]
        );
        assert_eq!(candidates[0].length(), 2);
    }

    #[test]
    fn test_deletion_requires_flanking_quality() {
        let mut quals = vec![30u8; 8];
        quals[4] = 10;
        let r = Read::with_direction("chr1", 1, "ACGTGTAC", quals, "4M2D4M", DirectionType::Forward)
            .unwrap();
        assert!(finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap().is_empty());
    }

    #[test]
    fn test_deletion_past_reference_end_suppressed() {
        let reference = b"ACGTACGT";
        let r = read(5, "ACAC", "2M10D2M");
        let candidates = finder(true).find_candidates(&r, reference, "chr1").unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_deletion_direction_from_stitched_anchor() {
        let mut directions = vec![DirectionType::Forward; 8];
        directions[3] = DirectionType::Stitched;
        for d in directions.iter_mut().skip(4) {
            *d = DirectionType::Reverse;
        }
        let r = Read::new(
            "chr1",
            1,
            b"ACGTGTAC".to_vec(),
            vec![30; 8],
            parse_cigar("4M2D4M").unwrap(),
            directions,
            true,
        )
        .unwrap();
        let candidates = finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].support_by_direction, [0, 0, 1]);
        assert_eq!(candidates[0].read_collapsed_counts[ReadCollapsedType::DuplexStitched.index()], 1);
    }

    #[test]
    fn test_direction_transition_without_stitching_fails() {
        let mut directions = vec![DirectionType::Forward; 8];
        for d in directions.iter_mut().skip(4) {
            *d = DirectionType::Reverse;
        }
        let r = Read::new(
            "chr1",
            1,
            b"ACGTGTAC".to_vec(),
            vec![30; 8],
            parse_cigar("4M2D4M").unwrap(),
            directions,
            false,
        )
        .unwrap();
        let result = finder(true).find_candidates(&r, REFERENCE, "chr1");
        assert!(matches!(result, Err(VcallerError::DirectionTransition { .. })));
    }

    #[test]
    fn test_n_bases_skipped() {
        let r = read(1, "ACNTACGTAC", "10M");
        assert!(finder(true).find_candidates(&r, REFERENCE, "chr1").unwrap().is_empty());
    }
}
