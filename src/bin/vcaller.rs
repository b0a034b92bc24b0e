//! CLI binary for vcaller - calls low-frequency alleles from an indexed BAM

use clap::{Parser, ValueEnum};
use env_logger::Env;
use rayon::prelude::*;
use std::path::PathBuf;
use vcaller_rs::{
    bam::{call_contig, reference_contigs, BamReader, ContigInputs, ReadFilter},
    config::{validate_config, NoiseModel, Ploidy, StrandBiasModel},
    intervals::load_bed,
    processor::ContigCalls,
    report::write_report,
    utils::{ensure_parent_dirs, get_num_cpus, validate_file_readable, Timer},
    vcf::{known_variant_set, read_vcf_alleles, AllelesByContig},
    CalledAllele, VariantCallerConfig, VcallerError, VcallerResult,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PloidyArg {
    Somatic,
    Diploid,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrandBiasArg {
    Poisson,
    Extended,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum NoiseModelArg {
    Flat,
    Window,
}

#[derive(Parser)]
#[command(name = "vcaller")]
#[command(about = "vcaller - low-frequency allele calling from aligned reads")]
#[command(long_about = "
vcaller finds candidate SNVs, MNVs, insertions and deletions in an indexed BAM file,
collapses partially observed candidates into fully observed ones, scores them
(coverage, Poisson Q-score, strand bias), genotypes and filters them, and writes
one tab-separated line per called allele.

The BAM index file (.bai) must be present next to the BAM file, and the reference
FASTA must be indexed (.fai). Contigs are processed in parallel.

Alleles listed in --forced-vcf are always reported, with a ForcedReport filter
when they would not otherwise be called. Alleles in --priors-vcf are treated as
known variants during collapsing.
")]
struct Args {
    /// Path to the input BAM file
    #[arg(long, value_name = "FILE")]
    input_bam: PathBuf,

    /// Path to the indexed reference FASTA
    #[arg(long, value_name = "FILE")]
    reference: PathBuf,

    /// Path to the output report (.tsv or .tsv.gz)
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// VCF of alleles that must always be reported
    #[arg(long, value_name = "FILE")]
    forced_vcf: Option<PathBuf>,

    /// VCF of known variants used as collapsing priors
    #[arg(long, value_name = "FILE")]
    priors_vcf: Option<PathBuf>,

    /// BED file restricting the reported regions
    #[arg(long, value_name = "FILE")]
    bed: Option<PathBuf>,

    /// Only process these contigs
    #[arg(long, value_delimiter = ',')]
    contigs: Vec<String>,

    /// Minimum base quality for a base to count as evidence
    #[arg(long, default_value_t = 20)]
    min_base_quality: u8,

    /// Minimum mapping quality for a read to be used
    #[arg(long, default_value_t = 1)]
    min_mapping_quality: u8,

    /// Use reads flagged as duplicates
    #[arg(long)]
    include_duplicates: bool,

    /// Minimum depth for an allele to be callable
    #[arg(long, default_value_t = 10)]
    min_coverage: u32,

    /// Minimum allele frequency for an allele to be callable
    #[arg(long, default_value_t = 0.01)]
    min_frequency: f64,

    /// Minimum Q-score for an allele to be callable
    #[arg(long, default_value_t = 20)]
    min_qscore: u32,

    /// Q-score below which a LowQ filter is applied
    #[arg(long, default_value_t = 30)]
    filter_qscore: u32,

    /// Depth below which a LowDP filter is applied
    #[arg(long, default_value_t = 10)]
    filter_depth: u32,

    /// Frequency below which a LowVariantFreq filter is applied
    #[arg(long)]
    filter_frequency: Option<f64>,

    /// Genotype quality below which a LowGQ filter is applied
    #[arg(long)]
    filter_genotype_qscore: Option<u32>,

    /// Estimated base-call quality used for Q-scores
    #[arg(long, default_value_t = 20)]
    estimated_base_quality: u32,

    /// Noise model used to estimate base-call error
    #[arg(long, value_enum, default_value = "flat")]
    noise_model: NoiseModelArg,

    /// Ploidy model for genotyping
    #[arg(long, value_enum, default_value = "somatic")]
    ploidy: PloidyArg,

    /// Strand bias model
    #[arg(long, value_enum, default_value = "extended")]
    strand_bias_model: StrandBiasArg,

    /// Strand bias score above which an SB filter is applied
    #[arg(long, default_value_t = 0.5)]
    strand_bias_acceptance: f64,

    /// Require variant support on both strands
    #[arg(long)]
    require_both_strands: bool,

    /// Do not call MNVs
    #[arg(long)]
    no_mnvs: bool,

    /// Maximum MNV length in bases
    #[arg(long, default_value_t = 3)]
    max_mnv_length: usize,

    /// Do not collapse partially observed candidates
    #[arg(long)]
    no_collapse: bool,

    /// Report reference calls for every covered position
    #[arg(long)]
    include_reference_calls: bool,

    /// Number of contigs processed in parallel
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output file if it exists
    #[arg(short, long)]
    force: bool,
}

fn build_config(args: &Args) -> VariantCallerConfig {
    let mut config = VariantCallerConfig::default();

    config.finder.min_base_quality = args.min_base_quality;
    config.finder.call_mnvs = !args.no_mnvs;
    config.finder.max_mnv_length = args.max_mnv_length;

    config.quality.estimated_base_quality = args.estimated_base_quality;
    config.quality.noise_model = match args.noise_model {
        NoiseModelArg::Flat => NoiseModel::Flat,
        NoiseModelArg::Window => NoiseModel::Window,
    };

    config.strand_bias.model = match args.strand_bias_model {
        StrandBiasArg::Poisson => StrandBiasModel::Poisson,
        StrandBiasArg::Extended => StrandBiasModel::Extended,
    };
    config.strand_bias.acceptance_criteria = args.strand_bias_acceptance;
    config.strand_bias.require_both_strands = args.require_both_strands;

    config.collapser.enabled = !args.no_collapse;

    config.caller.min_coverage = args.min_coverage;
    config.caller.min_frequency = args.min_frequency;
    config.caller.min_qscore = args.min_qscore;
    config.caller.include_reference_calls = args.include_reference_calls;
    config.caller.ploidy = match args.ploidy {
        PloidyArg::Somatic => Ploidy::Somatic,
        PloidyArg::Diploid => Ploidy::Diploid,
    };
    config.caller.filters.min_depth = Some(args.filter_depth);
    config.caller.filters.min_qscore = Some(args.filter_qscore);
    config.caller.filters.min_frequency = args.filter_frequency;
    config.caller.filters.min_genotype_qscore = args.filter_genotype_qscore;

    config
}

fn run() -> VcallerResult<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting vcaller");
    log::info!("Input BAM: {:?}", args.input_bam);
    log::info!("Reference: {:?}", args.reference);
    log::info!("Output: {:?}", args.output);
    log::info!("Number of processes: {}", args.num_processes);

    validate_file_readable(&args.input_bam)?;
    validate_file_readable(&args.reference)?;
    for optional in [&args.forced_vcf, &args.priors_vcf, &args.bed].into_iter().flatten() {
        validate_file_readable(optional)?;
    }

    if args.output.exists() && !args.force {
        return Err(VcallerError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output file {:?} already exists. Use --force to overwrite.", args.output),
        )));
    }
    ensure_parent_dirs(&args.output)?;

    let config = build_config(&args);
    validate_config(&config)?;
    let filter = ReadFilter {
        min_mapping_quality: args.min_mapping_quality,
        include_duplicates: args.include_duplicates,
    };

    let _timer = Timer::new("Loading inputs");
    let mut forced: AllelesByContig = match &args.forced_vcf {
        Some(path) => read_vcf_alleles(path)?,
        None => AllelesByContig::new(),
    };
    let mut priors: AllelesByContig = match &args.priors_vcf {
        Some(path) => read_vcf_alleles(path)?,
        None => AllelesByContig::new(),
    };
    let mut intervals = match &args.bed {
        Some(path) => Some(load_bed(path)?),
        None => None,
    };
    log::info!(
        "Loaded {} forced alleles and {} priors",
        forced.values().map(|m| m.values().map(Vec::len).sum::<usize>()).sum::<usize>(),
        priors.values().map(|m| m.values().map(Vec::len).sum::<usize>()).sum::<usize>()
    );

    let in_reference = reference_contigs(&args.reference)?;
    let mut work = Vec::new();
    for contig in BamReader::new(&args.input_bam, filter)?.contigs() {
        if !args.contigs.is_empty() && !args.contigs.contains(&contig) {
            continue;
        }
        if !in_reference.contains(&contig) {
            log::warn!("Contig {} is not in the reference, skipping", contig);
            continue;
        }
        let contig_intervals = match intervals.as_mut() {
            Some(by_contig) => match by_contig.remove(&contig) {
                Some(set) => Some(set),
                None => {
                    log::debug!("No target intervals on {}, skipping", contig);
                    continue;
                }
            },
            None => None,
        };
        let inputs = ContigInputs {
            forced_alleles: forced.remove(&contig).unwrap_or_default(),
            known_variants: priors
                .remove(&contig)
                .map(|alleles| known_variant_set(&alleles))
                .unwrap_or_default(),
            intervals: contig_intervals,
        };
        work.push((contig, inputs));
    }
    drop(_timer);

    if work.is_empty() {
        log::warn!("No contigs to process");
    }

    let _timer = Timer::new("Calling alleles");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_processes.max(1))
        .build()
        .map_err(|e| VcallerError::InvalidConfig(format!("Could not start worker pool: {}", e)))?;

    let results: Vec<(String, ContigCalls)> = pool.install(|| {
        work.into_par_iter()
            .map(|(contig, inputs)| -> VcallerResult<(String, ContigCalls)> {
                let calls = call_contig(&args.input_bam, &args.reference, &contig, &config, filter, inputs)?;
                Ok((contig, calls))
            })
            .collect::<VcallerResult<Vec<_>>>()
    })?;
    drop(_timer);

    let alleles: Vec<&CalledAllele> = results
        .iter()
        .flat_map(|(_, calls)| calls.values().flatten())
        .collect();
    let passing = alleles
        .iter()
        .filter(|a| a.filters.is_empty() && !a.is_reference())
        .count();
    log::info!("Called {} alleles ({} passing variants)", alleles.len(), passing);

    let _timer = Timer::new("Writing report");
    write_report(&args.output, alleles)?;

    log::info!("Analysis completed successfully");
    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: VcallerError) -> ! {
    match error {
        VcallerError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
            eprintln!("For BAM files, ensure the index file (.bai) is present.");
        }
        VcallerError::InvalidVariant(msg) => {
            eprintln!("Error: Invalid input record: {}", msg);
            eprintln!("Please check that your VCF and BED files are properly formatted.");
        }
        VcallerError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check your calling thresholds.");
        }
        VcallerError::InvalidRead(msg) => {
            eprintln!("Error: Invalid read: {}", msg);
            eprintln!("Please check that your BAM file is coordinate sorted and matches the reference.");
        }
        e @ VcallerError::DirectionTransition { .. } => {
            eprintln!("Error: {}", e);
            eprintln!("Please check the XD tags of stitched reads.");
        }
        VcallerError::InvalidAllele(msg) => {
            eprintln!("Error: Invalid allele: {}", msg);
        }
        VcallerError::Htslib(ref e) => {
            eprintln!("Error: BAM/FASTA processing error: {}", e);
            eprintln!("Please check that your BAM file is valid and has an index (.bai) file,");
            eprintln!("and that the reference FASTA has a .fai index.");
        }
        VcallerError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        VcallerError::Csv(ref e) => {
            eprintln!("Error: Data processing error: {}", e);
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
