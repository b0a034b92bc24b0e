//! Configuration parameters for candidate finding, scoring, collapsing and calling

use crate::math::t_test_critical_value;
use crate::{VcallerError, VcallerResult};

/// How the estimated base-call error rate is derived when scoring an allele
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseModel {
    /// Use the configured base-call quality everywhere
    Flat,
    /// Lower the estimated quality to the noise observed around the allele
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandBiasModel {
    Poisson,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ploidy {
    Somatic,
    Diploid,
}

#[derive(Debug, Clone)]
pub struct FinderConfig {
    pub min_base_quality: u8,
    pub call_mnvs: bool,
    pub max_mnv_length: usize,
    pub max_intervening_ref: usize,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            min_base_quality: 20,
            call_mnvs: true,
            max_mnv_length: 3,
            max_intervening_ref: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoverageConfig {
    /// Count reads carrying a deletion over a position towards its coverage
    pub include_deletions: bool,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            include_deletions: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityConfig {
    pub max_qscore: u32,
    pub estimated_base_quality: u32,
    pub noise_model: NoiseModel,
    /// Positions on each side of the allele inspected by the window noise model
    pub noise_window: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_qscore: 100,
            estimated_base_quality: 20,
            noise_model: NoiseModel::Flat,
            noise_window: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrandBiasConfig {
    pub model: StrandBiasModel,
    pub acceptance_criteria: f64,
    pub min_detectable_frequency: f64,
    pub require_both_strands: bool,
    /// One-sided alpha used to test forward vs reverse frequency
    pub t_test_alpha: f64,
}

impl Default for StrandBiasConfig {
    fn default() -> Self {
        Self {
            model: StrandBiasModel::Extended,
            acceptance_criteria: 0.5,
            min_detectable_frequency: 0.01,
            require_both_strands: false,
            t_test_alpha: 0.025,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollapserConfig {
    pub enabled: bool,
    pub exclude_mnvs: bool,
    pub frequency_threshold: f64,
    pub frequency_ratio_threshold: f64,
}

impl Default for CollapserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exclude_mnvs: false,
            frequency_threshold: 0.1,
            frequency_ratio_threshold: 0.5,
        }
    }
}

/// Thresholds that tag filters on callable alleles; `None` disables a filter
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub min_depth: Option<u32>,
    pub min_qscore: Option<u32>,
    pub min_frequency: Option<f64>,
    pub strand_bias: bool,
    pub min_genotype_qscore: Option<u32>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_depth: Some(10),
            min_qscore: Some(30),
            min_frequency: None,
            strand_bias: true,
            min_genotype_qscore: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallerConfig {
    pub min_coverage: u32,
    pub min_frequency: f64,
    pub min_qscore: u32,
    pub include_reference_calls: bool,
    pub ploidy: Ploidy,
    pub filters: FilterConfig,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            min_coverage: 10,
            min_frequency: 0.01,
            min_qscore: 20,
            include_reference_calls: false,
            ploidy: Ploidy::Somatic,
            filters: FilterConfig::default(),
        }
    }
}

/// Batching of one contig's read stream
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Distance the read stream must advance before a batch is called
    pub batch_window: u32,
    /// Positions behind the read front that stay open for collapsing
    pub lookahead: u32,
    /// Positions behind the cleared watermark kept in the count source
    pub retention: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_window: 1000,
            lookahead: 50,
            retention: 200,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariantCallerConfig {
    pub finder: FinderConfig,
    pub coverage: CoverageConfig,
    pub quality: QualityConfig,
    pub strand_bias: StrandBiasConfig,
    pub collapser: CollapserConfig,
    pub caller: CallerConfig,
    pub processor: ProcessorConfig,
}

fn check_fraction(name: &str, value: f64) -> VcallerResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(VcallerError::InvalidConfig(format!(
            "{} must be between 0 and 1",
            name
        )));
    }
    Ok(())
}

/// Validate variant calling configuration parameters
pub fn validate_config(config: &VariantCallerConfig) -> VcallerResult<()> {
    if config.finder.call_mnvs && config.finder.max_mnv_length < 2 {
        return Err(VcallerError::InvalidConfig(
            "max_mnv_length must be at least 2 when MNV calling is enabled".to_string(),
        ));
    }

    if config.quality.max_qscore == 0 {
        return Err(VcallerError::InvalidConfig(
            "max_qscore must be positive".to_string(),
        ));
    }

    if config.quality.estimated_base_quality == 0 {
        return Err(VcallerError::InvalidConfig(
            "estimated_base_quality must be positive".to_string(),
        ));
    }

    check_fraction("min_frequency", config.caller.min_frequency)?;
    check_fraction("min_detectable_frequency", config.strand_bias.min_detectable_frequency)?;
    check_fraction("collapse frequency_threshold", config.collapser.frequency_threshold)?;
    if let Some(freq) = config.caller.filters.min_frequency {
        check_fraction("filter min_frequency", freq)?;
    }

    if config.collapser.frequency_ratio_threshold < 0.0 {
        return Err(VcallerError::InvalidConfig(
            "frequency_ratio_threshold must not be negative".to_string(),
        ));
    }

    if config.strand_bias.acceptance_criteria <= 0.0 {
        return Err(VcallerError::InvalidConfig(
            "strand bias acceptance_criteria must be positive".to_string(),
        ));
    }

    if t_test_critical_value(config.strand_bias.t_test_alpha).is_none() {
        return Err(VcallerError::InvalidConfig(format!(
            "t_test_alpha {} must be one of 0.005, 0.01, 0.025, 0.05, 0.1",
            config.strand_bias.t_test_alpha
        )));
    }

    if config.processor.batch_window == 0 {
        return Err(VcallerError::InvalidConfig(
            "batch_window must be positive".to_string(),
        ));
    }

    Ok(())
}
