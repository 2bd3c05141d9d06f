//! liblm-core
//!
//! N-gram language-model engine: integer log-domain arithmetic, ARPA and
//! binary (DMP) model loading, backoff scoring and named model sets.
//!
//! Probabilities are `i32` logarithms in a configurable base (1.0001 by
//! default). Models share one [`LogMath`] context by `Arc`; a [`ModelSet`]
//! only accepts models built on the same context.
//!
//! Public API:
//! - `LogMath` - log-domain conversion and addition
//! - `Vocabulary` - word ↔ id table, id 0 is the OOV token
//! - `NGramModel` - a loaded (or synthetic) model with its weight triple
//! - `ModelSet` - named models with one active member
//! - `LanguageModel` - scoring interface shared by models and sets
//! - `LmConfig` - TOML-backed configuration
//!
//! # Example
//! ```
//! use liblm_core::{LanguageModel, LmConfig, ModelSet, NGramModel};
//! use std::sync::Arc;
//!
//! let arpa = "\\data\\\nngram 1=3\nngram 2=1\n\n\\1-grams:\n-1.0 <s> -0.2\n-0.6 hi -0.1\n-0.8 </s>\n\n\\2-grams:\n-0.1 <s> hi\n\n\\end\\\n";
//! let config = LmConfig::default();
//! let lmath = config.log_math().unwrap();
//! let model = Arc::new(NGramModel::from_arpa_reader(arpa.as_bytes(), lmath.clone(), &config).unwrap());
//!
//! let mut set = ModelSet::new(lmath);
//! set.add(model.clone(), "base", 1.0, true).unwrap();
//! set.select("base").unwrap();
//! assert_eq!(set.score_words("hi", &["<s>"]), model.score_words("hi", &["<s>"]));
//! assert_eq!(set.score_words("hi", &["<s>"]).n_used, 2);
//! ```
pub mod error;
pub use error::{LmError, LmResult};

pub mod config;
pub use config::LmConfig;

pub mod logmath;
pub use logmath::LogMath;

pub mod vocab;
pub use vocab::{VocabBuilder, Vocabulary, WordId, INVALID_ID, OOV_ID};

pub mod tables;
pub use tables::NgramTables;

pub mod quant;
pub use quant::Quantizer;

pub mod arpa;

pub mod dmp;
pub use dmp::{ByteOrder, DmpOptions};

pub mod backoff;
pub use backoff::{BackoffScorer, NgramScore};

pub mod synthetic;
pub use synthetic::SyntheticLm;

pub mod model;
pub use model::{FileFormat, LanguageModel, ModelKind, NGramModel, Weights};

pub mod set;
pub use set::ModelSet;
