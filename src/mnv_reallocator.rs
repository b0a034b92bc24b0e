//! Redistribution of support from MNVs that failed calling

use crate::allele::{AlleleCategory, CalledAllele, CandidateAllele};
use crate::VcallerResult;

/// Finds the longest called SNV/MNV lying inside `mnv` at `offset` that agrees
/// with it base for base
fn longest_sub_allele(mnv: &CalledAllele, offset: usize, alleles: &[CalledAllele]) -> Option<usize> {
    let position = mnv.position + offset as u32;
    alleles
        .iter()
        .enumerate()
        .filter(|(_, allele)| allele.category.is_snv_like() && allele.position == position)
        .filter(|(_, allele)| {
            let end = offset + allele.reference.len();
            end <= mnv.reference.len()
                && allele.key() != mnv.key()
                && mnv.reference[offset..end] == allele.reference
                && mnv.alternate[offset..end] == allele.alternate
        })
        .max_by_key(|(_, allele)| allele.reference.len())
        .map(|(i, _)| i)
}

/// Move the support of each failed MNV into the called alleles it contains.
/// Mismatching bases not covered by any called allele become SNVs carrying the
/// MNV's support; those past `max_cleared_position` are returned so the caller
/// can hand them to a later batch.
pub fn reallocate(
    failed: Vec<CalledAllele>,
    alleles: &mut Vec<CalledAllele>,
    max_cleared_position: Option<u32>,
) -> VcallerResult<Vec<CandidateAllele>> {
    let mut deferred: Vec<CandidateAllele> = Vec::new();

    for mnv in failed {
        let reference = mnv.reference.as_bytes();
        let alternate = mnv.alternate.as_bytes();
        let mut offset = 0usize;

        while offset < reference.len() {
            if reference[offset] == alternate[offset] {
                offset += 1;
                continue;
            }

            if let Some(index) = longest_sub_allele(&mnv, offset, alleles) {
                alleles[index].add_support_from(&mnv);
                offset += alleles[index].reference.len();
                continue;
            }

            let position = mnv.position + offset as u32;
            let mut piece = CandidateAllele::new(
                &mnv.contig,
                position,
                &mnv.reference[offset..offset + 1],
                &mnv.alternate[offset..offset + 1],
                AlleleCategory::Snv,
            )?;
            piece.support_by_direction = mnv.support_by_direction;
            piece.well_anchored_support_by_direction = mnv.well_anchored_support_by_direction;
            piece.read_collapsed_counts = mnv.read_collapsed_counts;

            match max_cleared_position {
                Some(max_cleared) if piece.last_counted_position() > max_cleared => {
                    match deferred.iter_mut().find(|c| c.same_identity(&piece)) {
                        Some(existing) => existing.absorb(&piece),
                        None => deferred.push(piece),
                    }
                }
                _ => alleles.push(CalledAllele::from_candidate(piece)),
            }
            offset += 1;
        }
    }

    Ok(deferred)
}
