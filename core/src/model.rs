//! Loaded language models.
//!
//! `NGramModel` owns a vocabulary and either a set of record tables (loaded
//! from ARPA or DMP) or a synthetic scoring function. Its structure never
//! changes after loading; the only mutable state is the weight triple, kept
//! as an immutable snapshot that `apply_weights` swaps atomically.
//!
//! # Example
//! ```
//! use liblm_core::{LmConfig, NGramModel};
//!
//! let arpa = "\\data\\\nngram 1=2\n\n\\1-grams:\n-0.5 hello\n-0.3 world\n\n\\end\\\n";
//! let config = LmConfig::default();
//! let lmath = config.log_math().unwrap();
//! let model = NGramModel::from_arpa_reader(arpa.as_bytes(), lmath, &config).unwrap();
//! assert_eq!(model.word_id("<UNK>"), 0);
//! assert_eq!(model.score_words("world", &[]).n_used, 1);
//! ```
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::arpa;
use crate::backoff::{BackoffScorer, NgramScore};
use crate::config::{validate_weights, LmConfig};
use crate::dmp::{self, DmpOptions};
use crate::error::{LmError, LmResult};
use crate::logmath::LogMath;
use crate::synthetic::SyntheticLm;
use crate::tables::NgramTables;
use crate::vocab::{VocabBuilder, Vocabulary, WordId, INVALID_ID, OOV_ID};

/// Which loader produced a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Arpa,
    Dmp,
    Synthetic,
}

/// On-disk format selector for [`NGramModel::read`] and [`NGramModel::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    Arpa,
    Dmp,
    /// Binary if the file starts with the DMP magic, text otherwise.
    #[default]
    Auto,
}

/// Scoring seam shared by single models and model sets.
pub trait LanguageModel {
    /// Weighted score of `wid` after `hist` (most recent first).
    fn score(&self, wid: WordId, hist: &[WordId]) -> NgramScore;

    /// Unweighted backoff probability.
    fn prob(&self, wid: WordId, hist: &[WordId]) -> NgramScore;

    /// Id of `word`, or [`INVALID_ID`].
    fn word_id(&self, word: &str) -> WordId;

    fn word(&self, id: WordId) -> Option<&str>;

    /// Like [`score`](Self::score) on strings; unknown words become the OOV id.
    fn score_words(&self, word: &str, hist: &[&str]) -> NgramScore {
        let (wid, ids) = resolve(self, word, hist);
        self.score(wid, &ids)
    }

    fn prob_words(&self, word: &str, hist: &[&str]) -> NgramScore {
        let (wid, ids) = resolve(self, word, hist);
        self.prob(wid, &ids)
    }
}

fn resolve<M: LanguageModel + ?Sized>(lm: &M, word: &str, hist: &[&str]) -> (WordId, Vec<WordId>) {
    let id = |w: &str| match lm.word_id(w) {
        INVALID_ID => OOV_ID,
        id => id,
    };
    (id(word), hist.iter().map(|&w| id(w)).collect())
}

/// One weight configuration, precomputed for scoring.
#[derive(Debug, Clone)]
pub struct Weights {
    lw: f64,
    wip: f64,
    uw: f64,
    log_wip: i32,
    /// `log(uw)`, added to a model unigram before mixing.
    log_uw: i32,
    /// `log((1 - uw) / |V|)`, the uniform share.
    log_uniform: i32,
    /// Interpolated unigram column; `None` when `uw == 1`.
    unigram_probs: Option<Arc<[i32]>>,
}

impl Weights {
    pub fn language_weight(&self) -> f64 {
        self.lw
    }

    pub fn word_insertion_penalty(&self) -> f64 {
        self.wip
    }

    pub fn unigram_weight(&self) -> f64 {
        self.uw
    }

    fn apply(&self, raw: i32) -> i32 {
        ((self.lw * raw as f64) as i32).saturating_add(self.log_wip)
    }
}

enum Backend {
    Tables(NgramTables),
    Synthetic(SyntheticLm),
}

pub struct NGramModel {
    kind: ModelKind,
    lmath: Arc<LogMath>,
    vocab: Vocabulary,
    backend: Backend,
    sentence_start: Option<WordId>,
    weights: RwLock<Arc<Weights>>,
}

impl NGramModel {
    /// Load a model file.
    pub fn read<P: AsRef<Path>>(
        path: P,
        format: FileFormat,
        lmath: Arc<LogMath>,
        config: &LmConfig,
    ) -> LmResult<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let format = match format {
            FileFormat::Auto => {
                if dmp::is_dmp(reader.fill_buf()?) {
                    FileFormat::Dmp
                } else {
                    FileFormat::Arpa
                }
            }
            f => f,
        };
        tracing::debug!(path = %path.display(), ?format, "reading language model");
        match format {
            FileFormat::Dmp => Self::from_dmp_reader(reader, lmath, config),
            _ => Self::from_arpa_reader(reader, lmath, config),
        }
    }

    pub fn from_arpa_reader<R: BufRead>(
        reader: R,
        lmath: Arc<LogMath>,
        config: &LmConfig,
    ) -> LmResult<Self> {
        config.validate()?;
        let (vocab, tables) = arpa::read(reader, &lmath, &config.oov_token)?;
        Self::assemble(ModelKind::Arpa, lmath, vocab, Backend::Tables(tables), config)
    }

    pub fn from_dmp_reader<R: Read>(
        reader: R,
        lmath: Arc<LogMath>,
        config: &LmConfig,
    ) -> LmResult<Self> {
        config.validate()?;
        let (vocab, tables) = dmp::read(reader, &lmath, &config.oov_token)?;
        Self::assemble(ModelKind::Dmp, lmath, vocab, Backend::Tables(tables), config)
    }

    /// Build a table-free model over `words`. The OOV token is added at id 0
    /// if the list does not start with it; repeated words collapse.
    pub fn synthetic<I, S>(
        words: I,
        lm: SyntheticLm,
        lmath: Arc<LogMath>,
        config: &LmConfig,
    ) -> LmResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        config.validate()?;
        let mut builder = VocabBuilder::new(&config.oov_token);
        for w in words {
            builder.intern(w.as_ref());
        }
        let vocab = builder.finish()?;
        Self::assemble(ModelKind::Synthetic, lmath, vocab, Backend::Synthetic(lm), config)
    }

    fn assemble(
        kind: ModelKind,
        lmath: Arc<LogMath>,
        vocab: Vocabulary,
        backend: Backend,
        config: &LmConfig,
    ) -> LmResult<Self> {
        let sentence_start = vocab.get(&config.sentence_start);
        let mut model = Self {
            kind,
            lmath,
            vocab,
            backend,
            sentence_start,
            weights: RwLock::new(Arc::new(Weights {
                lw: 1.0,
                wip: 1.0,
                uw: 1.0,
                log_wip: 0,
                log_uw: 0,
                log_uniform: 0,
                unigram_probs: None,
            })),
        };
        let initial = model.compute_weights(
            config.language_weight,
            config.word_insertion_penalty,
            config.unigram_weight,
        )?;
        model.weights = RwLock::new(Arc::new(initial));
        Ok(model)
    }

    /// Save in `format`. `Auto` writes ARPA. Synthetic models cannot be saved.
    pub fn write<P: AsRef<Path>>(&self, path: P, format: FileFormat, opts: &DmpOptions) -> LmResult<()> {
        self.tables()?;
        let out = BufWriter::new(File::create(path)?);
        match format {
            FileFormat::Dmp => self.write_dmp(out, opts),
            _ => self.write_arpa(out),
        }
    }

    pub fn write_arpa<W: Write>(&self, out: W) -> LmResult<()> {
        arpa::write(out, &self.lmath, &self.vocab, self.tables()?)
    }

    pub fn write_dmp<W: Write>(&self, out: W, opts: &DmpOptions) -> LmResult<()> {
        dmp::write(out, &self.lmath, &self.vocab, self.tables()?, opts)
    }

    fn tables(&self) -> LmResult<&NgramTables> {
        match &self.backend {
            Backend::Tables(t) => Ok(t),
            Backend::Synthetic(_) => Err(LmError::Unsupported(
                "synthetic models have no tables to write".to_string(),
            )),
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn log_math(&self) -> &Arc<LogMath> {
        &self.lmath
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn order(&self) -> u8 {
        match &self.backend {
            Backend::Tables(t) => t.order(),
            Backend::Synthetic(lm) => lm.order(),
        }
    }

    /// Records per order. Synthetic models report only their vocabulary.
    pub fn counts(&self) -> [usize; 3] {
        match &self.backend {
            Backend::Tables(t) => t.counts(),
            Backend::Synthetic(_) => [self.vocab.len(), 0, 0],
        }
    }

    pub fn word_id(&self, word: &str) -> WordId {
        self.vocab.id_of(word)
    }

    pub fn word(&self, id: WordId) -> Option<&str> {
        self.vocab.word(id)
    }

    /// Current `(language weight, word insertion penalty, unigram weight)`.
    pub fn weights(&self) -> (f64, f64, f64) {
        let w = self.weight_snapshot();
        (w.lw, w.wip, w.uw)
    }

    /// The weights in force right now. Scoring through [`score_with`]
    /// with one snapshot is unaffected by concurrent `apply_weights` calls.
    ///
    /// [`score_with`]: Self::score_with
    pub fn weight_snapshot(&self) -> Arc<Weights> {
        match self.weights.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the weight triple.
    ///
    /// `lw > 0`, `wip > 0` and `0 <= uw <= 1` are required; anything else is
    /// a configuration error and the previous weights stay in force.
    pub fn apply_weights(&self, lw: f64, wip: f64, uw: f64) -> LmResult<()> {
        let next = Arc::new(self.compute_weights(lw, wip, uw)?);
        match self.weights.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::debug!(lw, wip, uw, "applied language model weights");
        Ok(())
    }

    fn compute_weights(&self, lw: f64, wip: f64, uw: f64) -> LmResult<Weights> {
        validate_weights(lw, wip, uw)?;
        let lmath = &self.lmath;
        let log_uw = lmath.to_log(uw);
        let log_uniform = lmath
            .to_log(1.0 / self.vocab.len() as f64)
            .saturating_add(lmath.to_log(1.0 - uw));

        let unigram_probs = match &self.backend {
            Backend::Tables(t) if uw < 1.0 => {
                let probs: Vec<i32> = t.unigrams()[..t.n_words()]
                    .iter()
                    .enumerate()
                    .map(|(w, u)| {
                        if Some(w as WordId) == self.sentence_start {
                            u.prob
                        } else {
                            lmath.add(u.prob.saturating_add(log_uw), log_uniform)
                        }
                    })
                    .collect();
                Some(Arc::from(probs))
            }
            _ => None,
        };

        Ok(Weights {
            lw,
            wip,
            uw,
            log_wip: lmath.to_log(wip),
            log_uw,
            log_uniform,
            unigram_probs,
        })
    }

    /// Unweighted backoff probability of `wid` after `hist`.
    pub fn prob(&self, wid: WordId, hist: &[WordId]) -> NgramScore {
        match &self.backend {
            Backend::Tables(t) => BackoffScorer::new(t).score(wid, hist),
            Backend::Synthetic(lm) => {
                let (wid, hist) = self.normalize(wid, hist, lm.order());
                lm.score(wid, hist)
            }
        }
    }

    /// Weighted score: `lw * p + log(wip)`, with `p` computed on unigrams
    /// mixed with the uniform distribution by `uw`.
    pub fn score(&self, wid: WordId, hist: &[WordId]) -> NgramScore {
        let weights = self.weight_snapshot();
        self.score_with(&weights, wid, hist)
    }

    /// [`score`](Self::score) under an explicit weight snapshot.
    pub fn score_with(&self, weights: &Weights, wid: WordId, hist: &[WordId]) -> NgramScore {
        let raw = match &self.backend {
            Backend::Tables(t) => {
                let mut scorer = BackoffScorer::new(t);
                if let Some(probs) = &weights.unigram_probs {
                    scorer = scorer.with_unigram_probs(probs);
                }
                scorer.score(wid, hist)
            }
            Backend::Synthetic(lm) => {
                let (wid, hist) = self.normalize(wid, hist, lm.order());
                let mut raw = lm.score(wid, hist);
                if raw.n_used == 1 && weights.uw < 1.0 && Some(wid) != self.sentence_start {
                    raw.score = self
                        .lmath
                        .add(raw.score.saturating_add(weights.log_uw), weights.log_uniform);
                }
                raw
            }
        };
        NgramScore::new(weights.apply(raw.score), raw.n_used)
    }

    /// Map an out-of-range target to OOV and cut the history at the first
    /// out-of-range id and at `order - 1`.
    fn normalize<'h>(&self, wid: WordId, hist: &'h [WordId], order: u8) -> (WordId, &'h [WordId]) {
        let wid = if self.vocab.contains_id(wid) { wid } else { OOV_ID };
        let usable = hist
            .iter()
            .take(order as usize - 1)
            .take_while(|&&w| self.vocab.contains_id(w))
            .count();
        (wid, &hist[..usable])
    }

    pub fn score_words(&self, word: &str, hist: &[&str]) -> NgramScore {
        LanguageModel::score_words(self, word, hist)
    }

    pub fn prob_words(&self, word: &str, hist: &[&str]) -> NgramScore {
        LanguageModel::prob_words(self, word, hist)
    }
}

impl LanguageModel for NGramModel {
    fn score(&self, wid: WordId, hist: &[WordId]) -> NgramScore {
        NGramModel::score(self, wid, hist)
    }

    fn prob(&self, wid: WordId, hist: &[WordId]) -> NgramScore {
        NGramModel::prob(self, wid, hist)
    }

    fn word_id(&self, word: &str) -> WordId {
        NGramModel::word_id(self, word)
    }

    fn word(&self, id: WordId) -> Option<&str> {
        NGramModel::word(self, id)
    }
}

impl std::fmt::Debug for NGramModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NGramModel")
            .field("kind", &self.kind)
            .field("order", &self.order())
            .field("counts", &self.counts())
            .field("weights", &self.weights())
            .finish()
    }
}
