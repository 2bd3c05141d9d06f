//! Engine configuration.
//!
//! One TOML-serializable struct carries the log-math parameters, the
//! vocabulary conventions and the initial weight triple every loader applies
//! to the model it builds.
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{LmError, LmResult};
use crate::logmath::{LogMath, MAX_SHIFT};
use crate::quant::MAX_QUANT_BITS;

pub const DEFAULT_OOV: &str = "<UNK>";
pub const DEFAULT_SENTENCE_START: &str = "<s>";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LmConfig {
    /// Base of the engine's integer logarithms.
    pub log_base: f64,
    /// Bits dropped from every log value after conversion.
    pub log_shift: u32,
    /// Precompute the log-add table instead of calling `ln` per addition.
    pub use_table: bool,

    /// Token that owns word id 0.
    pub oov_token: String,
    /// Token excluded from unigram-weight interpolation.
    pub sentence_start: String,

    /// Multiplier applied to every raw score (`lw`).
    pub language_weight: f64,
    /// Linear word-insertion penalty (`wip`), added in the log domain.
    pub word_insertion_penalty: f64,
    /// Share of the model unigram against a uniform distribution (`uw`).
    pub unigram_weight: f64,

    /// Index width of the value tables when writing binary models.
    pub quant_bits: u32,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            log_base: 1.0001,
            log_shift: 0,
            use_table: true,
            oov_token: DEFAULT_OOV.to_string(),
            sentence_start: DEFAULT_SENTENCE_START.to_string(),
            language_weight: 1.0,
            word_insertion_penalty: 1.0,
            unigram_weight: 1.0,
            quant_bits: MAX_QUANT_BITS,
        }
    }
}

impl LmConfig {
    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> LmResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> LmResult<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> LmResult<Self> {
        let config: LmConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> LmResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field, reporting the first invalid one.
    pub fn validate(&self) -> LmResult<()> {
        if !self.log_base.is_finite() || self.log_base <= 1.0 {
            return Err(LmError::config(format!(
                "log_base must be finite and > 1.0, got {}",
                self.log_base
            )));
        }
        if self.log_shift > MAX_SHIFT {
            return Err(LmError::config(format!(
                "log_shift must be <= {}, got {}",
                MAX_SHIFT, self.log_shift
            )));
        }
        if self.oov_token.is_empty() {
            return Err(LmError::config("oov_token must not be empty"));
        }
        if self.quant_bits == 0 || self.quant_bits > MAX_QUANT_BITS {
            return Err(LmError::config(format!(
                "quant_bits must be in 1..={}, got {}",
                MAX_QUANT_BITS, self.quant_bits
            )));
        }
        validate_weights(
            self.language_weight,
            self.word_insertion_penalty,
            self.unigram_weight,
        )
    }

    /// Build the shared log-math context these settings describe.
    pub fn log_math(&self) -> LmResult<Arc<LogMath>> {
        Ok(Arc::new(LogMath::new(
            self.log_base,
            self.log_shift,
            self.use_table,
        )?))
    }
}

/// Reject weight triples the scorer cannot use. Values are never clamped.
pub(crate) fn validate_weights(lw: f64, wip: f64, uw: f64) -> LmResult<()> {
    if !lw.is_finite() || lw <= 0.0 {
        return Err(LmError::config(format!(
            "language weight must be finite and > 0, got {}",
            lw
        )));
    }
    if !wip.is_finite() || wip <= 0.0 {
        return Err(LmError::config(format!(
            "word insertion penalty must be finite and > 0, got {}",
            wip
        )));
    }
    if !(0.0..=1.0).contains(&uw) {
        return Err(LmError::config(format!(
            "unigram weight must be in [0, 1], got {}",
            uw
        )));
    }
    Ok(())
}
