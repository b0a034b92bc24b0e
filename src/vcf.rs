//! Allele lists (forced alleles, known-variant priors) read from VCF files

use crate::allele::AlleleCategory;
use crate::utils::is_gzipped;
use crate::{VcallerError, VcallerResult};
use flate2::read::MultiGzDecoder;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// (reference, alternate) pairs by contig and position
pub type AllelesByContig = HashMap<String, BTreeMap<u32, Vec<(String, String)>>>;

/// The site columns of one VCF data line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfSite {
    pub chrom: String,
    pub pos: u32,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
}

impl VcfSite {
    pub fn from_line(line: &str) -> VcallerResult<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            return Err(VcallerError::InvalidVariant(format!(
                "Invalid VCF line format: {}",
                line
            )));
        }

        let pos = fields[1]
            .parse::<u32>()
            .map_err(|_| VcallerError::InvalidVariant(format!("Invalid position: {}", fields[1])))?;
        if pos == 0 {
            return Err(VcallerError::InvalidVariant(format!(
                "Position must be 1-based: {}",
                line
            )));
        }

        Ok(VcfSite {
            chrom: fields[0].to_string(),
            pos,
            ref_allele: fields[3].to_ascii_uppercase(),
            alt_alleles: fields[4]
                .split(',')
                .map(|alt| alt.to_ascii_uppercase())
                .collect(),
        })
    }
}

fn is_plain_sequence(allele: &str) -> bool {
    !allele.is_empty() && allele.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N'))
}

/// Read every simple (reference, alternate) pair from a VCF, optionally gzipped.
/// Multi-allelic sites are split; symbolic, missing and complex alleles are
/// skipped with a warning.
pub fn read_vcf_alleles<P: AsRef<Path>>(path: P) -> VcallerResult<AllelesByContig> {
    let file = File::open(&path)
        .map_err(|_| VcallerError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    let reader: Box<dyn BufRead> = if is_gzipped(&path)? {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut alleles = AllelesByContig::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let site = match VcfSite::from_line(line) {
            Ok(site) => site,
            Err(e) => {
                log::warn!("Skipping invalid VCF record: {}", e);
                continue;
            }
        };

        for alt in &site.alt_alleles {
            if !is_plain_sequence(&site.ref_allele) || !is_plain_sequence(alt) {
                log::debug!("Skipping non-sequence allele {}>{} at {}:{}", site.ref_allele, alt, site.chrom, site.pos);
                continue;
            }
            if let Err(e) = AlleleCategory::infer(&site.ref_allele, alt) {
                log::warn!("Skipping allele at {}:{}: {}", site.chrom, site.pos, e);
                continue;
            }

            let pairs = alleles
                .entry(site.chrom.clone())
                .or_default()
                .entry(site.pos)
                .or_default();
            let pair = (site.ref_allele.clone(), alt.clone());
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
    }

    Ok(alleles)
}

/// Flatten one contig's pairs into the lookup set used for known-variant priors
pub fn known_variant_set(alleles: &BTreeMap<u32, Vec<(String, String)>>) -> HashSet<(u32, String, String)> {
    alleles
        .iter()
        .flat_map(|(&pos, pairs)| {
            pairs
                .iter()
                .map(move |(reference, alternate)| (pos, reference.clone(), alternate.clone()))
        })
        .collect()
}
