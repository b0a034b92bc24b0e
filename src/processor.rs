//! Streaming of one contig's reads through candidate finding and calling

use crate::allele::{AlleleCategory, CalledAllele, CandidateAllele};
use crate::allele_source::{AlleleCountSource, InMemoryAlleleSource};
use crate::caller::{AlleleCaller, CandidateBatch};
use crate::candidate_finder::CandidateVariantFinder;
use crate::config::{ProcessorConfig, VariantCallerConfig};
use crate::read::Read;
use crate::{VcallerError, VcallerResult};
use log::{debug, info};
use std::collections::BTreeMap;

pub type ContigCalls = BTreeMap<u32, Vec<CalledAllele>>;

/// Owns every per-contig component. Reads must arrive sorted by position.
pub struct ContigProcessor {
    contig: String,
    reference: Vec<u8>,
    config: ProcessorConfig,
    include_reference_calls: bool,
    finder: CandidateVariantFinder,
    caller: AlleleCaller,
    source: InMemoryAlleleSource,
    next_flush: u32,
    last_read_position: u32,
    reference_calls_through: u32,
    results: ContigCalls,
    reads_processed: usize,
    batches_called: usize,
}

impl ContigProcessor {
    pub fn new(reference: Vec<u8>, config: &VariantCallerConfig, caller: AlleleCaller) -> Self {
        Self {
            contig: caller.contig().to_string(),
            reference: reference.to_ascii_uppercase(),
            config: config.processor.clone(),
            include_reference_calls: config.caller.include_reference_calls,
            finder: CandidateVariantFinder::new(config.finder.clone()),
            caller,
            source: InMemoryAlleleSource::new(config.finder.min_base_quality),
            next_flush: config.processor.batch_window,
            last_read_position: 0,
            reference_calls_through: 0,
            results: BTreeMap::new(),
            reads_processed: 0,
            batches_called: 0,
        }
    }

    pub fn add_read(&mut self, read: &Read) -> VcallerResult<()> {
        if read.contig != self.contig {
            return Err(VcallerError::InvalidRead(format!(
                "Read on {} given to the {} processor",
                read.contig, self.contig
            )));
        }
        if read.position < self.last_read_position {
            return Err(VcallerError::InvalidRead(format!(
                "Reads on {} are not sorted: {} after {}",
                self.contig, read.position, self.last_read_position
            )));
        }
        self.last_read_position = read.position;

        // everything before this read's start has seen all of its reads
        if read.position > self.next_flush {
            let through = read.position - 1;
            self.flush(Some(through))?;
            self.next_flush = through.saturating_add(self.config.batch_window);
        }

        self.source.add_read_counts(read);
        let candidates = self.finder.find_candidates(read, &self.reference, &self.contig)?;
        self.source.add_candidates(candidates);
        self.reads_processed += 1;

        Ok(())
    }

    /// Call everything still pending and return the contig's alleles by position
    pub fn finish(mut self) -> VcallerResult<ContigCalls> {
        self.flush(None)?;
        info!(
            "Processed {} reads on {} in {} batches, {} positions called",
            self.reads_processed,
            self.contig,
            self.batches_called,
            self.results.len()
        );
        Ok(self.results)
    }

    fn flush(&mut self, through: Option<u32>) -> VcallerResult<()> {
        let max_cleared = through.map(|t| t.saturating_sub(self.config.lookahead));

        let mut candidates = self.source.take_candidates_through(through);
        if self.include_reference_calls {
            let end = max_cleared.unwrap_or(u32::MAX);
            candidates.extend(self.reference_candidates(end)?);
        }
        debug!(
            "Batch on {} through {:?}: {} candidates",
            self.contig,
            through,
            candidates.len()
        );

        let called = self
            .caller
            .call(CandidateBatch::new(candidates, max_cleared), &mut self.source)?;
        for (position, alleles) in called {
            self.results.entry(position).or_default().extend(alleles);
        }
        self.batches_called += 1;

        if let Some(max_cleared) = max_cleared {
            // deferred candidates still need the counts they span
            let mut clear_to = max_cleared.saturating_sub(self.config.retention);
            if let Some(first_pending) = self.source.first_pending_position() {
                clear_to = clear_to.min(first_pending.saturating_sub(1));
            }
            self.source.clear_through(clear_to);
        }
        Ok(())
    }

    /// Reference candidates for covered positions not yet offered
    fn reference_candidates(&mut self, end: u32) -> VcallerResult<Vec<CandidateAllele>> {
        let start = self.reference_calls_through.saturating_add(1);
        let end = end.min(self.reference.len() as u32);
        let mut candidates = Vec::new();

        for position in self.source.covered_positions(start, end) {
            let base = self.reference[(position - 1) as usize];
            if base == b'N' {
                continue;
            }
            let base = (base as char).to_string();
            candidates.push(CandidateAllele::new(
                &self.contig,
                position,
                &base,
                &base,
                AlleleCategory::Reference,
            )?);
        }
        self.reference_calls_through = self.reference_calls_through.max(end);

        Ok(candidates)
    }
}

/// Run a stream of reads for one contig through a fresh processor
pub fn process_reads<I>(
    reference: Vec<u8>,
    config: &VariantCallerConfig,
    caller: AlleleCaller,
    reads: I,
) -> VcallerResult<ContigCalls>
where
    I: IntoIterator<Item = VcallerResult<Read>>,
{
    let mut processor = ContigProcessor::new(reference, config, caller);
    for read in reads {
        processor.add_read(&read?)?;
    }
    processor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele::Genotype;
    use crate::genotype::SomaticGenotypeCalculator;
    use crate::read::DirectionType;

    const REFERENCE: &str = "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT";

    fn config(include_reference_calls: bool) -> VariantCallerConfig {
        let mut config = VariantCallerConfig::default();
        config.processor.batch_window = 10;
        config.processor.lookahead = 5;
        config.caller.include_reference_calls = include_reference_calls;
        config
    }

    /// Three 10-base reads per start in 1..=20; the first read of each start
    /// carries G>T at position 15 when it covers it
    fn reads() -> Vec<VcallerResult<Read>> {
        let mut reads = Vec::new();
        for start in 1u32..=20 {
            for copy in 0..3 {
                let from = (start - 1) as usize;
                let mut sequence = REFERENCE.as_bytes()[from..from + 10].to_vec();
                if copy == 0 && (start..start + 10).contains(&15) {
                    sequence[(15 - start) as usize] = b'T';
                }
                let direction = if start % 2 == 0 {
                    DirectionType::Forward
                } else {
                    DirectionType::Reverse
                };
                let sequence = String::from_utf8(sequence).unwrap();
                reads.push(Read::with_direction("chr1", start, &sequence, vec![30; 10], "10M", direction));
            }
        }
        reads
    }

    fn caller(config: &VariantCallerConfig) -> AlleleCaller {
        AlleleCaller::new("chr1", config, Box::new(SomaticGenotypeCalculator::new(10)))
    }

    fn direction(copy: usize) -> DirectionType {
        if copy % 2 == 0 {
            DirectionType::Forward
        } else {
            DirectionType::Reverse
        }
    }

    /// Reads from position 1 to `end` deleting `deleted` bases after the anchor at `anchor`
    fn deletion_reads(anchor: usize, deleted: usize, end: usize, copies: usize) -> Vec<VcallerResult<Read>> {
        let reference = REFERENCE.as_bytes();
        let mut sequence = reference[..anchor].to_vec();
        sequence.extend_from_slice(&reference[anchor + deleted..end]);
        let sequence = String::from_utf8(sequence).unwrap();
        let cigar = format!("{}M{}D{}M", anchor, deleted, end - anchor - deleted);
        (0..copies)
            .map(|copy| Read::with_direction("chr1", 1, &sequence, vec![30; sequence.len()], &cigar, direction(copy)))
            .collect()
    }

    fn reference_reads(start: u32, copies: usize) -> Vec<VcallerResult<Read>> {
        let from = (start - 1) as usize;
        let sequence = &REFERENCE[from..from + 10];
        (0..copies)
            .map(|copy| Read::with_direction("chr1", start, sequence, vec![30; 10], "10M", direction(copy)))
            .collect()
    }

    fn deletion_support_and_coverage(
        config: &VariantCallerConfig,
        reads: Vec<VcallerResult<Read>>,
        position: u32,
    ) -> (u32, u32) {
        let called = process_reads(REFERENCE.as_bytes().to_vec(), config, caller(config), reads).unwrap();
        let at_position = &called[&position];
        assert_eq!(at_position.len(), 1);
        (at_position[0].allele_support(), at_position[0].total_coverage())
    }

    #[test]
    fn test_batched_calling() {
        let config = config(false);
        let called = process_reads(REFERENCE.as_bytes().to_vec(), &config, caller(&config), reads()).unwrap();

        assert_eq!(called.len(), 1);
        let snv = &called[&15];
        assert_eq!(snv.len(), 1);
        assert_eq!((snv[0].reference.as_str(), snv[0].alternate.as_str()), ("G", "T"));
        assert_eq!(snv[0].candidate_support(), 10);
        assert_eq!(snv[0].total_coverage(), 30);
        assert_eq!(snv[0].genotype, Genotype::HeterozygousAltRef);
    }

    #[test]
    fn test_reference_calls() {
        let config = config(true);
        let called = process_reads(REFERENCE.as_bytes().to_vec(), &config, caller(&config), reads()).unwrap();

        assert_eq!(called.len(), 29);
        assert_eq!(called[&15].len(), 1);
        assert_eq!(called[&15][0].alternate, "T");
        assert!(called[&1][0].is_reference());
        assert_eq!(called[&1][0].total_coverage(), 3);
        assert!(called.values().all(|alleles| alleles.len() == 1));
    }

    #[test]
    fn test_indel_behind_read_front_waits_without_collapsing() {
        let mut batched = config(false);
        batched.collapser.enabled = false;
        let mut single = batched.clone();
        single.processor.batch_window = 1000;

        let reads = || {
            let mut reads = deletion_reads(11, 2, 20, 10);
            reads.extend(reference_reads(12, 20));
            reads
        };

        let expected = deletion_support_and_coverage(&single, reads(), 11);
        assert_eq!(expected, (10, 30));
        assert_eq!(deletion_support_and_coverage(&batched, reads(), 11), expected);
    }

    #[test]
    fn test_deletion_spanning_cleared_position_waits_for_its_end() {
        let mut batched = config(false);
        batched.processor.batch_window = 5;
        batched.processor.lookahead = 1;
        batched.processor.retention = 0;
        let mut single = batched.clone();
        single.processor.batch_window = 1000;

        let reads = || {
            let mut reads = deletion_reads(8, 5, 20, 10);
            reads.extend(reference_reads(10, 20));
            reads
        };

        let expected = deletion_support_and_coverage(&single, reads(), 8);
        assert_eq!(expected, (10, 20));
        assert_eq!(deletion_support_and_coverage(&batched, reads(), 8), expected);
    }

    #[test]
    fn test_unsorted_reads_rejected() {
        let config = config(false);
        let mut processor = ContigProcessor::new(REFERENCE.as_bytes().to_vec(), &config, caller(&config));
        let later = Read::with_direction("chr1", 20, "ACGTACGTAC", vec![30; 10], "10M", DirectionType::Forward).unwrap();
        let earlier = Read::with_direction("chr1", 5, "ACGTACGTAC", vec![30; 10], "10M", DirectionType::Forward).unwrap();
        processor.add_read(&later).unwrap();
        assert!(processor.add_read(&earlier).is_err());

        let other = Read::with_direction("chr2", 25, "ACGTACGTAC", vec![30; 10], "10M", DirectionType::Forward).unwrap();
        assert!(processor.add_read(&other).is_err());
    }
}
