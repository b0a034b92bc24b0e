//! Merging of ambiguously anchored candidates into their canonical forms

use crate::allele::{AlleleCategory, CandidateAllele};
use crate::allele_source::{defer_uncleared, AlleleCountSource};
use crate::config::CollapserConfig;
use crate::coverage::CoverageCalculator;
use log::debug;
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;

/// Last reference coordinate touched by the allele
fn end_position(candidate: &CandidateAllele) -> u32 {
    match candidate.category {
        AlleleCategory::Deletion => candidate.position + candidate.length() as u32,
        AlleleCategory::Insertion => candidate.position,
        _ => candidate.position + candidate.length() as u32 - 1,
    }
}

fn open_rank(candidate: &CandidateAllele) -> u8 {
    match (candidate.open_on_left, candidate.open_on_right) {
        (true, true) => 0,
        (true, false) | (false, true) => 1,
        (false, false) => 2,
    }
}

/// Order in which open candidates are offered for collapsing
fn source_order(a: &CandidateAllele, b: &CandidateAllele) -> Ordering {
    b.length()
        .cmp(&a.length())
        .then_with(|| open_rank(a).cmp(&open_rank(b)))
        .then_with(|| a.reference.cmp(&b.reference))
        .then_with(|| a.alternate.cmp(&b.alternate))
        .then_with(|| b.support().cmp(&a.support()))
        .then_with(|| a.position.cmp(&b.position))
}

type TargetRank<'a> = (bool, Reverse<u32>, Reverse<usize>, &'a str, &'a str, u32);

fn target_rank(candidate: &CandidateAllele) -> TargetRank<'_> {
    (
        candidate.is_open(),
        Reverse(candidate.support()),
        Reverse(candidate.length()),
        candidate.reference.as_str(),
        candidate.alternate.as_str(),
        candidate.position,
    )
}

/// Whether `source` may describe the same event as the more specific `target`
pub fn can_collapse(source: &CandidateAllele, target: &CandidateAllele) -> bool {
    if source.contig != target.contig {
        return false;
    }
    if source.category.is_indel() || target.category.is_indel() {
        if source.category != target.category {
            return false;
        }
    } else if !(source.category.is_snv_like() && target.category.is_snv_like()) {
        return false;
    }
    if target.length() < source.length() {
        return false;
    }
    if source.is_fully_anchored() {
        return target.is_fully_anchored() && source.same_identity(target);
    }

    match source.category {
        AlleleCategory::Deletion => {
            let same_start = source.position == target.position;
            let same_end = end_position(source) == end_position(target);
            match (source.open_on_left, source.open_on_right) {
                (true, true) => same_start || same_end,
                (false, true) => same_start,
                _ => same_end,
            }
        }
        AlleleCategory::Insertion => {
            if source.position != target.position {
                return false;
            }
            let inserted = &source.alternate[1..];
            let target_inserted = &target.alternate[1..];
            match (source.open_on_left, source.open_on_right) {
                (true, true) => target_inserted.contains(inserted),
                (false, true) => target_inserted.starts_with(inserted),
                _ => target_inserted.ends_with(inserted),
            }
        }
        _ => match (source.open_on_left, source.open_on_right) {
            (true, true) => {
                if target.position > source.position || end_position(target) < end_position(source) {
                    return false;
                }
                let offset = (source.position - target.position) as usize;
                target.alternate.get(offset..offset + source.alternate.len()) == Some(source.alternate.as_str())
            }
            (false, true) => {
                source.position == target.position && target.alternate.starts_with(&source.alternate)
            }
            _ => {
                end_position(source) == end_position(target) && target.alternate.ends_with(&source.alternate)
            }
        },
    }
}

pub struct VariantCollapser {
    config: CollapserConfig,
    coverage: CoverageCalculator,
    known_variants: HashSet<(u32, String, String)>,
}

impl VariantCollapser {
    pub fn new(config: CollapserConfig, coverage: CoverageCalculator) -> Self {
        Self {
            config,
            coverage,
            known_variants: HashSet::new(),
        }
    }

    /// Variants given as (position, reference, alternate) that are trusted as anchored
    pub fn with_known_variants(mut self, known_variants: HashSet<(u32, String, String)>) -> Self {
        self.known_variants = known_variants;
        self
    }

    pub fn collapse(
        &self,
        candidates: Vec<CandidateAllele>,
        source: &mut dyn AlleleCountSource,
        max_cleared_position: Option<u32>,
    ) -> Vec<CandidateAllele> {
        let mut slots: Vec<Option<CandidateAllele>> = candidates
            .into_iter()
            .map(|mut candidate| {
                let key = (candidate.position, candidate.reference.clone(), candidate.alternate.clone());
                if self.known_variants.contains(&key) {
                    candidate.open_on_left = false;
                    candidate.open_on_right = false;
                    candidate.is_known = true;
                }
                Some(candidate)
            })
            .collect();

        let participates = |candidate: &CandidateAllele| {
            !(self.config.exclude_mnvs && candidate.category == AlleleCategory::Mnv)
        };

        let mut order: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|c| (i, c)))
            .filter(|(_, c)| c.is_open() && participates(*c))
            .map(|(i, _)| i)
            .collect();
        order.sort_by(|&a, &b| match (&slots[a], &slots[b]) {
            (Some(a), Some(b)) => source_order(a, b),
            _ => Ordering::Equal,
        });

        let mut collapsed = 0usize;
        for index in order {
            let candidate = match &slots[index] {
                Some(candidate) if candidate.is_open() => candidate,
                _ => continue,
            };
            if let Some(target) = self.choose_target(index, candidate, &slots, &*source, &participates) {
                if let Some(merged) = slots[index].take() {
                    if let Some(target) = slots[target].as_mut() {
                        target.absorb(&merged);
                        collapsed += 1;
                    }
                }
            }
        }

        let remaining: Vec<CandidateAllele> = slots.into_iter().flatten().collect();
        let num_remaining = remaining.len();
        let kept = defer_uncleared(remaining, source, max_cleared_position);

        if collapsed > 0 || kept.len() < num_remaining {
            debug!(
                "Collapsed {} candidates, deferred {} past position {:?}",
                collapsed,
                num_remaining - kept.len(),
                max_cleared_position
            );
        }

        kept
    }

    fn choose_target(
        &self,
        index: usize,
        candidate: &CandidateAllele,
        slots: &[Option<CandidateAllele>],
        source: &dyn AlleleCountSource,
        participates: &dyn Fn(&CandidateAllele) -> bool,
    ) -> Option<usize> {
        let mut eligible: Vec<(usize, &CandidateAllele)> = slots
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .filter_map(|(i, slot)| slot.as_ref().map(|c| (i, c)))
            .filter(|(_, target)| participates(*target) && can_collapse(candidate, target))
            .collect();
        if eligible.is_empty() {
            return None;
        }
        eligible.sort_by(|(_, a), (_, b)| target_rank(a).cmp(&target_rank(b)));

        if let Some((i, _)) = eligible
            .iter()
            .find(|(_, target)| target.is_fully_anchored() && target.same_identity(candidate))
        {
            return Some(*i);
        }

        let source_frequency = self.coverage.live_frequency(candidate, source);
        eligible
            .into_iter()
            .find(|(_, target)| {
                let frequency = self.coverage.live_frequency(target, source);
                frequency >= self.config.frequency_threshold
                    && (source_frequency <= 0.0
                        || frequency / source_frequency >= self.config.frequency_ratio_threshold)
            })
            .map(|(i, _)| i)
    }
}
