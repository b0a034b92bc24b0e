//! Tab-separated report of called alleles

use crate::allele::CalledAllele;
use crate::read::DirectionType;
use crate::utils::wants_gzip;
use crate::{VcallerError, VcallerResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One output line
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    #[serde(rename = "Chrom")]
    pub chrom: String,
    #[serde(rename = "Pos")]
    pub pos: u32,
    #[serde(rename = "Ref")]
    pub reference: String,
    #[serde(rename = "Alt")]
    pub alternate: String,
    #[serde(rename = "Type")]
    pub category: String,
    #[serde(rename = "Genotype")]
    pub genotype: String,
    #[serde(rename = "Filter")]
    pub filter: String,
    #[serde(rename = "Depth")]
    pub depth: u32,
    #[serde(rename = "Alt_Support")]
    pub alt_support: u32,
    #[serde(rename = "Ref_Support")]
    pub ref_support: u32,
    #[serde(rename = "Frequency")]
    pub frequency: String,
    #[serde(rename = "Qscore")]
    pub qscore: u32,
    #[serde(rename = "GQ")]
    pub genotype_qscore: u32,
    #[serde(rename = "Noise_Level")]
    pub noise_level: u32,
    #[serde(rename = "Strand_Bias")]
    pub strand_bias: String,
    #[serde(rename = "Fwd_Support")]
    pub forward_support: u32,
    #[serde(rename = "Rev_Support")]
    pub reverse_support: u32,
    #[serde(rename = "Stitched_Support")]
    pub stitched_support: u32,
    #[serde(rename = "Forced")]
    pub forced: bool,
}

impl From<&CalledAllele> for ReportRow {
    fn from(allele: &CalledAllele) -> Self {
        let filter = if allele.filters.is_empty() {
            "PASS".to_string()
        } else {
            allele
                .filters
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(";")
        };

        ReportRow {
            chrom: allele.contig.clone(),
            pos: allele.position,
            reference: allele.reference.clone(),
            alternate: allele.alternate.clone(),
            category: allele.category.to_string(),
            genotype: allele.genotype.to_string(),
            filter,
            depth: allele.total_coverage(),
            alt_support: allele.allele_support(),
            ref_support: allele.reference_support(),
            frequency: format!("{:.4}", allele.frequency()),
            qscore: allele.variant_qscore,
            genotype_qscore: allele.genotype_qscore,
            noise_level: allele.noise_level_applied,
            strand_bias: format!("{:.4}", allele.strand_bias.gatk_bias_score),
            forward_support: allele.support_by_direction[DirectionType::Forward.index()],
            reverse_support: allele.support_by_direction[DirectionType::Reverse.index()],
            stitched_support: allele.support_by_direction[DirectionType::Stitched.index()],
            forced: allele.is_forced_to_report,
        }
    }
}

fn write_rows<'a, W, I>(writer: W, alleles: I) -> VcallerResult<W>
where
    W: Write,
    I: IntoIterator<Item = &'a CalledAllele>,
{
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);

    for allele in alleles {
        csv_writer.serialize(ReportRow::from(allele))?;
    }

    csv_writer
        .into_inner()
        .map_err(|e| VcallerError::Io(e.into_error()))
}

/// Write alleles in the order given; gzip compressed when the path ends in `.gz`.
/// Returns the number of rows written.
pub fn write_report<'a, P, I>(output_path: P, alleles: I) -> VcallerResult<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a CalledAllele>,
{
    let file = File::create(&output_path)?;
    let mut count = 0usize;
    let counted = alleles.into_iter().inspect(|_| count += 1);

    if wants_gzip(&output_path) {
        let encoder = write_rows(GzEncoder::new(file, Compression::default()), counted)?;
        encoder.finish()?;
    } else {
        let mut file = write_rows(file, counted)?;
        file.flush()?;
    }

    log::info!("Wrote {} called alleles to {:?}", count, output_path.as_ref());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allele::{AlleleCategory, CandidateAllele, FilterType, Genotype};
    use flate2::read::MultiGzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn alleles() -> Vec<CalledAllele> {
        let candidate = CandidateAllele::new("chr1", 100, "A", "T", AlleleCategory::Snv).unwrap();
        let mut snv = CalledAllele::from_candidate(candidate);
        snv.support_by_direction = [3, 2, 0];
        snv.coverage.total_coverage = 50;
        snv.coverage.allele_support = 5;
        snv.coverage.reference_support = 45;
        snv.variant_qscore = 42;
        snv.genotype = Genotype::HeterozygousAltRef;

        let mut forced = CalledAllele::forced("chr1", 200, "G", "GCT").unwrap();
        forced.genotype = Genotype::HomozygousRef;
        forced.add_filter(FilterType::LowDepth);
        vec![snv, forced]
    }

    #[test]
    fn test_report_rows() {
        let alleles = alleles();
        let row = ReportRow::from(&alleles[0]);
        assert_eq!(row.filter, "PASS");
        assert_eq!(row.frequency, "0.1000");
        assert_eq!(row.genotype, "0/1");
        assert_eq!((row.forward_support, row.reverse_support), (3, 2));

        let forced = ReportRow::from(&alleles[1]);
        assert!(forced.forced);
        assert_eq!(forced.filter, "LowDP;ForcedReport");
    }

    #[test]
    fn test_write_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calls.tsv");
        let alleles = alleles();
        assert_eq!(write_report(&path, &alleles).unwrap(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Chrom\tPos\tRef\tAlt\tType"));
        assert!(lines[1].starts_with("chr1\t100\tA\tT\t"));
        assert!(lines[2].starts_with("chr1\t200\tG\tGCT\t"));
    }

    #[test]
    fn test_write_gzipped_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calls.tsv.gz");
        write_report(&path, &alleles()).unwrap();

        let mut content = String::new();
        MultiGzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content.lines().count(), 3);
    }
}
