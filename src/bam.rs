//! BAM and reference input for per-contig calling

use crate::caller::AlleleCaller;
use crate::config::VariantCallerConfig;
use crate::genotype::calculator_for;
use crate::intervals::IntervalSet;
use crate::processor::{process_reads, ContigCalls};
use crate::read::{parse_direction_string, CigarOp, DirectionType, Read};
use crate::{VcallerError, VcallerResult};
use rust_htslib::bam::record::{Aux, Cigar, Record};
use rust_htslib::bam::{IndexedReader, Read as BamRead};
use rust_htslib::faidx;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Which alignment records are turned into reads
#[derive(Debug, Clone, Copy)]
pub struct ReadFilter {
    pub min_mapping_quality: u8,
    pub include_duplicates: bool,
}

impl Default for ReadFilter {
    fn default() -> Self {
        Self {
            min_mapping_quality: 1,
            include_duplicates: false,
        }
    }
}

impl ReadFilter {
    pub fn accepts(&self, record: &Record) -> bool {
        !(record.is_unmapped()
            || record.is_secondary()
            || record.is_supplementary()
            || (record.is_duplicate() && !self.include_duplicates)
            || record.mapq() < self.min_mapping_quality)
    }
}

fn convert_cigar(cigar: &Cigar) -> CigarOp {
    match *cigar {
        Cigar::Match(n) | Cigar::Equal(n) | Cigar::Diff(n) => CigarOp::Match(n),
        Cigar::Ins(n) => CigarOp::Ins(n),
        Cigar::Del(n) => CigarOp::Del(n),
        Cigar::RefSkip(n) => CigarOp::RefSkip(n),
        Cigar::SoftClip(n) => CigarOp::SoftClip(n),
        Cigar::HardClip(n) => CigarOp::HardClip(n),
        Cigar::Pad(n) => CigarOp::Pad(n),
    }
}

fn aux_integer(aux: Aux) -> Option<i64> {
    match aux {
        Aux::I8(v) => Some(v as i64),
        Aux::U8(v) => Some(v as i64),
        Aux::I16(v) => Some(v as i64),
        Aux::U16(v) => Some(v as i64),
        Aux::I32(v) => Some(v as i64),
        Aux::U32(v) => Some(v as i64),
        _ => None,
    }
}

/// Convert an alignment record into a `Read`, or `None` when the filter rejects it
/// or it carries no sequence.
///
/// Per-base directions come from the stitched-direction `XD` tag when present,
/// otherwise from the record's strand. A positive `bD` tag marks a duplex read.
pub fn record_to_read(record: &Record, contig: &str, filter: &ReadFilter) -> VcallerResult<Option<Read>> {
    if !filter.accepts(record) {
        return Ok(None);
    }
    let sequence = record.seq().as_bytes();
    if sequence.is_empty() {
        return Ok(None);
    }

    let position = u32::try_from(record.pos() + 1)
        .map_err(|_| VcallerError::InvalidRead(format!("Invalid alignment position {}", record.pos())))?;
    let cigar: Vec<CigarOp> = record.cigar().iter().map(convert_cigar).collect();

    let direction_map = match record.aux(b"XD") {
        Ok(Aux::String(directions)) => parse_direction_string(directions)?,
        _ => {
            let strand = if record.is_reverse() {
                DirectionType::Reverse
            } else {
                DirectionType::Forward
            };
            vec![strand; sequence.len()]
        }
    };
    let is_duplex = record
        .aux(b"bD")
        .ok()
        .and_then(aux_integer)
        .is_some_and(|depth| depth > 0);

    Read::new(
        contig,
        position,
        sequence,
        record.qual().to_vec(),
        cigar,
        direction_map,
        is_duplex,
    )
    .map(Some)
}

/// Indexed BAM reader yielding filtered reads one contig at a time
pub struct BamReader {
    reader: IndexedReader,
    filter: ReadFilter,
}

impl BamReader {
    pub fn new<P: AsRef<Path>>(bam_path: P, filter: ReadFilter) -> VcallerResult<Self> {
        let bam_path = bam_path.as_ref();

        // Check for BAI index file next to the BAM file
        let bai_path = bam_path.with_extension("bam.bai");
        let alt_bai_path = bam_path.with_extension("bai");

        let reader = if bai_path.exists() {
            IndexedReader::from_path_and_index(bam_path, &bai_path)?
        } else if alt_bai_path.exists() {
            IndexedReader::from_path_and_index(bam_path, &alt_bai_path)?
        } else {
            return Err(VcallerError::FileNotFound(format!(
                "BAM index file not found. Expected {} or {}",
                bai_path.display(),
                alt_bai_path.display()
            )));
        };

        Ok(BamReader { reader, filter })
    }

    /// Contig names in header order
    pub fn contigs(&self) -> Vec<String> {
        self.reader
            .header()
            .target_names()
            .iter()
            .map(|name| String::from_utf8_lossy(name).to_string())
            .collect()
    }

    /// Position-sorted reads aligned to `contig`
    pub fn reads<'a>(
        &'a mut self,
        contig: &str,
        contig_length: u32,
    ) -> VcallerResult<impl Iterator<Item = VcallerResult<Read>> + 'a> {
        let tid = self
            .reader
            .header()
            .tid(contig.as_bytes())
            .ok_or_else(|| VcallerError::InvalidRead(format!("Unknown chromosome: {}", contig)))?;
        self.reader.fetch((tid, 0u32, contig_length))?;

        let filter = self.filter;
        let contig = contig.to_string();
        Ok(self.reader.records().filter_map(move |result| match result {
            Ok(record) => record_to_read(&record, &contig, &filter).transpose(),
            Err(e) => Some(Err(VcallerError::Htslib(e))),
        }))
    }
}

/// Load one contig's sequence from an indexed FASTA
pub fn load_reference<P: AsRef<Path>>(fasta_path: P, contig: &str) -> VcallerResult<Vec<u8>> {
    let reader = faidx::Reader::from_path(fasta_path.as_ref())?;
    if !reader.seq_names()?.iter().any(|name| name == contig) {
        return Err(VcallerError::InvalidRead(format!(
            "Contig {} not found in reference {}",
            contig,
            fasta_path.as_ref().display()
        )));
    }
    let length = reader.fetch_seq_len(contig) as usize;
    let sequence = reader.fetch_seq(contig, 0, length.saturating_sub(1))?;
    Ok(sequence.to_ascii_uppercase())
}

/// Contig names present in an indexed FASTA
pub fn reference_contigs<P: AsRef<Path>>(fasta_path: P) -> VcallerResult<Vec<String>> {
    let reader = faidx::Reader::from_path(fasta_path.as_ref())?;
    Ok(reader.seq_names()?)
}

/// Per-contig inputs beyond the reads themselves
#[derive(Debug, Clone, Default)]
pub struct ContigInputs {
    pub forced_alleles: BTreeMap<u32, Vec<(String, String)>>,
    pub known_variants: HashSet<(u32, String, String)>,
    pub intervals: Option<IntervalSet>,
}

/// Call one contig from an indexed BAM and FASTA. Opens its own readers so
/// contigs can be processed in parallel.
pub fn call_contig(
    bam_path: &Path,
    fasta_path: &Path,
    contig: &str,
    config: &VariantCallerConfig,
    filter: ReadFilter,
    inputs: ContigInputs,
) -> VcallerResult<ContigCalls> {
    let reference = load_reference(fasta_path, contig)?;
    let contig_length = reference.len() as u32;

    let min_depth = config.caller.filters.min_depth.unwrap_or(config.caller.min_coverage);
    let genotyper = calculator_for(config.caller.ploidy, min_depth);
    let mut caller = AlleleCaller::new(contig, config, genotyper)
        .with_forced_alleles(inputs.forced_alleles)
        .with_known_variants(inputs.known_variants);
    if let Some(intervals) = inputs.intervals {
        caller = caller.with_intervals(intervals);
    }

    let mut bam = BamReader::new(bam_path, filter)?;
    let reads = bam.reads(contig, contig_length)?;
    process_reads(reference, config, caller, reads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::CigarString;
    use std::fs::File;
    use tempfile::NamedTempFile;

    fn record(flags: u16, mapq: u8) -> Record {
        let mut record = Record::new();
        let cigar = CigarString(vec![Cigar::SoftClip(2), Cigar::Match(6), Cigar::Ins(1), Cigar::Match(3)]);
        record.set(b"read1", Some(&cigar), b"GGACGTACTACG", &[30; 12]);
        record.set_pos(99);
        record.set_flags(flags);
        record.set_mapq(mapq);
        record
    }

    #[test]
    fn test_record_to_read() {
        let record = record(0x10, 60);
        let read = record_to_read(&record, "chr1", &ReadFilter::default()).unwrap().unwrap();

        assert_eq!(read.position, 100);
        assert_eq!(read.sequence, b"GGACGTACTACG".to_vec());
        assert_eq!(
            read.cigar,
            vec![CigarOp::SoftClip(2), CigarOp::Match(6), CigarOp::Ins(1), CigarOp::Match(3)]
        );
        assert!(read.direction_map.iter().all(|&d| d == DirectionType::Reverse));
        assert!(!read.is_duplex);
        assert_eq!(read.end_position(), 108);
    }

    #[test]
    fn test_stitched_and_duplex_tags() {
        let mut record = record(0, 60);
        record.push_aux(b"XD", Aux::String("4F4S4R")).unwrap();
        record.push_aux(b"bD", Aux::U8(3)).unwrap();
        let read = record_to_read(&record, "chr1", &ReadFilter::default()).unwrap().unwrap();

        assert_eq!(read.direction_map[0], DirectionType::Forward);
        assert_eq!(read.direction_map[5], DirectionType::Stitched);
        assert_eq!(read.direction_map[11], DirectionType::Reverse);
        assert!(read.is_duplex);
    }

    #[test]
    fn test_read_filter() {
        let filter = ReadFilter::default();
        assert!(record_to_read(&record(0x4, 60), "chr1", &filter).unwrap().is_none());
        assert!(record_to_read(&record(0x100, 60), "chr1", &filter).unwrap().is_none());
        assert!(record_to_read(&record(0x800, 60), "chr1", &filter).unwrap().is_none());
        assert!(record_to_read(&record(0x400, 60), "chr1", &filter).unwrap().is_none());
        assert!(record_to_read(&record(0, 0), "chr1", &filter).unwrap().is_none());

        let keep_duplicates = ReadFilter {
            include_duplicates: true,
            ..ReadFilter::default()
        };
        assert!(record_to_read(&record(0x400, 60), "chr1", &keep_duplicates).unwrap().is_some());
    }

    #[test]
    fn test_bam_reader_index_detection() {
        let temp_bam = NamedTempFile::new().unwrap();
        let result = BamReader::new(temp_bam.path(), ReadFilter::default());

        if let Err(VcallerError::FileNotFound(msg)) = result {
            assert!(msg.contains("BAM index file not found"));
            assert!(msg.contains(".bam.bai"));
            assert!(msg.contains(".bai"));
        } else {
            panic!("Expected FileNotFound error");
        }
    }

    #[test]
    fn test_bam_reader_with_index_but_invalid_bam() {
        let temp_bam = NamedTempFile::new().unwrap();
        let bam_path = temp_bam.path();

        for extension in ["bam.bai", "bai"] {
            let bai_path = bam_path.with_extension(extension);
            File::create(&bai_path).unwrap();
            // index found, but the BAM itself is not valid
            assert!(BamReader::new(bam_path, ReadFilter::default()).is_err());
            std::fs::remove_file(bai_path).ok();
        }
    }

    #[test]
    fn test_load_reference() {
        use std::io::Write;
        let dir = tempfile::TempDir::new().unwrap();
        let fasta = dir.path().join("ref.fa");
        let mut file = File::create(&fasta).unwrap();
        writeln!(file, ">chr1\nacgtACGTAC\nGTAC\n>chr2\nTTTT").unwrap();
        drop(file);

        assert_eq!(reference_contigs(&fasta).unwrap(), vec!["chr1".to_string(), "chr2".to_string()]);
        let sequence = load_reference(&fasta, "chr1").unwrap();
        assert_eq!(sequence, b"ACGTACGTACGTAC".to_vec());
        assert!(load_reference(&fasta, "chr3").is_err());
    }
}
