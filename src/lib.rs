//! # vcaller - Allele Calling Engine
//!
//! A Rust implementation of a low-frequency variant caller. Aligned reads from one
//! contig are turned into candidate alleles, collapsed, scored (coverage, Poisson
//! Q-score, strand bias), genotyped and filtered into called alleles.

pub mod allele;
pub mod allele_source;
pub mod bam;
pub mod caller;
pub mod candidate_finder;
pub mod collapser;
pub mod config;
pub mod coverage;
pub mod genotype;
pub mod intervals;
pub mod locus;
pub mod math;
pub mod mnv_reallocator;
pub mod processor;
pub mod quality;
pub mod read;
pub mod report;
pub mod strand_bias;
pub mod utils;
pub mod vcf;

pub use allele::{AlleleCategory, CalledAllele, CandidateAllele, FilterType, Genotype};
pub use allele_source::{AlleleCountSource, InMemoryAlleleSource};
pub use caller::{AlleleCaller, CandidateBatch};
pub use config::VariantCallerConfig;
pub use read::{CigarOp, DirectionType, Read};

/// Error types for the vcaller library
#[derive(Debug, thiserror::Error)]
pub enum VcallerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTSlib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid allele: {0}")]
    InvalidAllele(String),

    #[error("Invalid read: {0}")]
    InvalidRead(String),

    #[error(
        "Unexpected direction transition from {start:?} to {end:?} without a stitched region at read index {read_index}"
    )]
    DirectionTransition {
        start: DirectionType,
        end: DirectionType,
        read_index: usize,
    },

    #[error("Invalid variant format: {0}")]
    InvalidVariant(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type VcallerResult<T> = Result<T, VcallerError>;
