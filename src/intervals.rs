//! Reportable regions loaded from BED files

use crate::utils::is_gzipped;
use crate::{VcallerError, VcallerResult};
use flate2::read::MultiGzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Sorted, merged 1-based inclusive intervals of one contig
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<(u32, u32)>,
}

impl IntervalSet {
    pub fn new(mut intervals: Vec<(u32, u32)>) -> Self {
        intervals.retain(|(start, end)| start <= end);
        intervals.sort_unstable();

        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(intervals.len());
        for (start, end) in intervals {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        Self { intervals: merged }
    }

    pub fn contains(&self, position: u32) -> bool {
        let index = self.intervals.partition_point(|&(_, end)| end < position);
        self.intervals
            .get(index)
            .is_some_and(|&(start, _)| start <= position)
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }
}

/// Load a BED file (optionally gzipped) into per-contig interval sets
pub fn load_bed<P: AsRef<Path>>(path: P) -> VcallerResult<HashMap<String, IntervalSet>> {
    let file = File::open(&path)
        .map_err(|_| VcallerError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    let reader: Box<dyn BufRead> = if is_gzipped(&path)? {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut by_contig: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
    for result in csv_reader.records() {
        let record = result?;
        if record.len() < 3 || record[0].starts_with("track") || record[0].starts_with("browser") {
            continue;
        }

        let parse = |field: &str| {
            field
                .trim()
                .parse::<u32>()
                .map_err(|_| VcallerError::InvalidVariant(format!("Invalid BED coordinate: {}", field)))
        };
        let start = parse(&record[1])?;
        let end = parse(&record[2])?;

        // half-open 0-based to 1-based inclusive
        by_contig
            .entry(record[0].to_string())
            .or_default()
            .push((start + 1, end));
    }

    Ok(by_contig
        .into_iter()
        .map(|(contig, intervals)| (contig, IntervalSet::new(intervals)))
        .collect())
}
