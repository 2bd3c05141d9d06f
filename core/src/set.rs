//! Named collections of models sharing one log-math context.
//!
//! A set holds models by `Arc`, each with a linear interpolation weight, and
//! scores through at most one active member. Word ids at the set level live
//! in a merged vocabulary covering every member; each member keeps a
//! translation table from set ids to its own ids.
use std::sync::{Arc, OnceLock};

use crate::backoff::NgramScore;
use crate::config::DEFAULT_OOV;
use crate::error::{LmError, LmResult};
use crate::logmath::LogMath;
use crate::model::{LanguageModel, NGramModel};
use crate::vocab::{VocabBuilder, WordId, INVALID_ID, OOV_ID};

#[derive(Debug)]
struct Entry {
    name: String,
    model: Arc<NGramModel>,
    weight: f64,
}

/// Union of member vocabularies plus per-member id maps.
#[derive(Debug)]
struct MergedVocab {
    words: VocabBuilder,
    /// `to_member[e][set_id]` is the id of that word in entry `e`, or OOV.
    to_member: Vec<Vec<WordId>>,
}

impl MergedVocab {
    fn build(entries: &[Entry]) -> Self {
        let oov = entries
            .first()
            .map_or(DEFAULT_OOV, |e| e.model.vocab().oov());
        let mut words = VocabBuilder::new(oov);
        for e in entries {
            // every member's id 0 is the set's id 0
            for w in e.model.vocab().iter().skip(1) {
                words.intern(w);
            }
        }
        let to_member = entries
            .iter()
            .map(|e| {
                let vocab = e.model.vocab();
                (0..words.len() as WordId)
                    .map(|id| match (id, words.word(id)) {
                        (OOV_ID, _) | (_, None) => OOV_ID,
                        (_, Some(w)) => vocab.get(w).unwrap_or(OOV_ID),
                    })
                    .collect()
            })
            .collect();
        tracing::debug!(words = words.len(), models = entries.len(), "merged model set vocabulary");
        Self { words, to_member }
    }
}

#[derive(Debug)]
pub struct ModelSet {
    lmath: Arc<LogMath>,
    entries: Vec<Entry>,
    active: Option<usize>,
    merged: OnceLock<MergedVocab>,
}

impl ModelSet {
    pub fn new(lmath: Arc<LogMath>) -> Self {
        Self {
            lmath,
            entries: Vec::new(),
            active: None,
            merged: OnceLock::new(),
        }
    }

    pub fn log_math(&self) -> &Arc<LogMath> {
        &self.lmath
    }

    /// Add `model` under `name`.
    ///
    /// With `merge_vocab` the set vocabulary is rebuilt immediately;
    /// otherwise on the first set-level id lookup.
    pub fn add(
        &mut self,
        model: Arc<NGramModel>,
        name: &str,
        weight: f64,
        merge_vocab: bool,
    ) -> LmResult<()> {
        if self.position(name).is_some() {
            return Err(LmError::DuplicateName(name.to_string()));
        }
        if !Arc::ptr_eq(model.log_math(), &self.lmath) {
            return Err(LmError::IncompatibleLogMath(name.to_string()));
        }
        check_weight(weight)?;

        self.entries.push(Entry {
            name: name.to_string(),
            model,
            weight,
        });
        self.merged = OnceLock::new();
        if merge_vocab {
            self.merged();
        }
        tracing::info!(name, weight, members = self.entries.len(), "added model to set");
        Ok(())
    }

    /// Make `name` the active model. On error the selection is unchanged.
    pub fn select(&mut self, name: &str) -> LmResult<&Arc<NGramModel>> {
        let idx = self
            .position(name)
            .ok_or_else(|| LmError::NotFound(name.to_string()))?;
        self.active = Some(idx);
        Ok(&self.entries[idx].model)
    }

    /// Take `name` out of the set and hand back the model.
    pub fn remove(&mut self, name: &str) -> LmResult<Arc<NGramModel>> {
        let idx = self
            .position(name)
            .ok_or_else(|| LmError::NotFound(name.to_string()))?;
        let entry = self.entries.remove(idx);
        self.active = match self.active {
            Some(a) if a == idx => None,
            Some(a) if a > idx => Some(a - 1),
            other => other,
        };
        self.merged = OnceLock::new();
        tracing::info!(name, members = self.entries.len(), "removed model from set");
        Ok(entry.model)
    }

    pub fn set_weight(&mut self, name: &str, weight: f64) -> LmResult<()> {
        check_weight(weight)?;
        let idx = self
            .position(name)
            .ok_or_else(|| LmError::NotFound(name.to_string()))?;
        self.entries[idx].weight = weight;
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    fn merged(&self) -> &MergedVocab {
        self.merged.get_or_init(|| MergedVocab::build(&self.entries))
    }

    pub fn active(&self) -> Option<&Arc<NGramModel>> {
        self.active.map(|i| &self.entries[i].model)
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.map(|i| self.entries[i].name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<NGramModel>> {
        self.position(name).map(|i| &self.entries[i].model)
    }

    pub fn weight(&self, name: &str) -> Option<f64> {
        self.position(name).map(|i| self.entries[i].weight)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<NGramModel>, f64)> + '_ {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), &e.model, e.weight))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Number of words in the merged vocabulary.
    pub fn n_words(&self) -> usize {
        self.merged().words.len()
    }

    fn no_model(&self) -> NgramScore {
        NgramScore::new(self.lmath.zero(), 0)
    }

    /// Translate set ids for the active member and run `f` on it.
    fn with_active<F>(&self, wid: WordId, hist: &[WordId], f: F) -> NgramScore
    where
        F: FnOnce(&NGramModel, WordId, &[WordId]) -> NgramScore,
    {
        let Some(idx) = self.active else {
            return self.no_model();
        };
        let map = &self.merged().to_member[idx];
        let local = |w: WordId| map.get(w as usize).copied().unwrap_or(INVALID_ID);
        let mut buf = [INVALID_ID; 2];
        let n = hist.len().min(buf.len());
        for (slot, &w) in buf.iter_mut().zip(&hist[..n]) {
            *slot = local(w);
        }
        f(&self.entries[idx].model, local(wid), &buf[..n])
    }

    /// Linear interpolation of every member's probability, weighted by the
    /// normalized set weights. Uses raw probabilities, not weighted scores.
    pub fn mixture_prob_words(&self, word: &str, hist: &[&str]) -> NgramScore {
        let total: f64 = self.entries.iter().map(|e| e.weight).sum();
        if total <= 0.0 {
            return self.no_model();
        }
        let mut acc = self.lmath.zero();
        let mut n_used = 0;
        for e in self.entries.iter().filter(|e| e.weight > 0.0) {
            let p = e.model.prob_words(word, hist);
            let share = self.lmath.to_log(e.weight / total);
            acc = self.lmath.add(acc, p.score.saturating_add(share));
            n_used = n_used.max(p.n_used);
        }
        NgramScore::new(acc, n_used)
    }
}

impl LanguageModel for ModelSet {
    fn score(&self, wid: WordId, hist: &[WordId]) -> NgramScore {
        self.with_active(wid, hist, |m, w, h| m.score(w, h))
    }

    fn prob(&self, wid: WordId, hist: &[WordId]) -> NgramScore {
        self.with_active(wid, hist, |m, w, h| m.prob(w, h))
    }

    fn word_id(&self, word: &str) -> WordId {
        self.merged().words.get(word).unwrap_or(INVALID_ID)
    }

    fn word(&self, id: WordId) -> Option<&str> {
        self.merged().words.word(id)
    }

    fn score_words(&self, word: &str, hist: &[&str]) -> NgramScore {
        match self.active() {
            Some(m) => m.score_words(word, hist),
            None => self.no_model(),
        }
    }

    fn prob_words(&self, word: &str, hist: &[&str]) -> NgramScore {
        match self.active() {
            Some(m) => m.prob_words(word, hist),
            None => self.no_model(),
        }
    }
}

fn check_weight(weight: f64) -> LmResult<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(LmError::config(format!(
            "model weight must be finite and >= 0, got {}",
            weight
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LmConfig;
    use crate::synthetic::SyntheticLm;

    fn synthetic(lmath: &Arc<LogMath>, words: &[&str], score: i32) -> Arc<NGramModel> {
        let config = LmConfig::default();
        Arc::new(
            NGramModel::synthetic(
                words.iter().copied(),
                SyntheticLm::new(2, move |w, h| NgramScore::new(score - w as i32, h.len() as u8 + 1)).unwrap(),
                Arc::clone(lmath),
                &config,
            )
            .unwrap(),
        )
    }

    fn lmath() -> Arc<LogMath> {
        LmConfig::default().log_math().unwrap()
    }

    #[test]
    fn empty_set_scores_zero() {
        let set = ModelSet::new(lmath());
        assert!(set.is_empty());
        let s = set.score(0, &[]);
        assert_eq!(s, NgramScore::new(set.log_math().zero(), 0));
        assert_eq!(set.score_words("x", &[]).n_used, 0);
        assert_eq!(set.word(0), Some("<UNK>"));
    }

    #[test]
    fn merged_ids_translate_per_member() {
        let lm = lmath();
        let mut set = ModelSet::new(Arc::clone(&lm));
        let a = synthetic(&lm, &["x", "y"], -100);
        let b = synthetic(&lm, &["y", "z"], -200);
        set.add(a, "a", 1.0, false).unwrap();
        set.add(b, "b", 1.0, true).unwrap();
        assert_eq!(set.n_words(), 4);
        assert_eq!(set.word_id("z"), 3);

        set.select("b").unwrap();
        // y is id 2 in the set but id 1 in b
        assert_eq!(set.prob(set.word_id("y"), &[]), NgramScore::new(-201, 1));
        // x is not in b -> OOV
        assert_eq!(set.prob(set.word_id("x"), &[]), NgramScore::new(-200, 1));
        assert_eq!(set.prob(set.word_id("y"), &[3]), NgramScore::new(-201, 2));
    }

    #[test]
    fn remove_adjusts_selection() {
        let lm = lmath();
        let mut set = ModelSet::new(Arc::clone(&lm));
        let a = synthetic(&lm, &["x"], -1);
        set.add(Arc::clone(&a), "a", 1.0, true).unwrap();
        set.add(synthetic(&lm, &["y"], -2), "b", 1.0, true).unwrap();
        set.select("b").unwrap();
        let removed = set.remove("a").unwrap();
        assert!(Arc::ptr_eq(&removed, &a));
        assert_eq!(set.active_name(), Some("b"));
        set.remove("b").unwrap();
        assert!(set.active().is_none());
        assert!(matches!(set.remove("b"), Err(LmError::NotFound(_))));
    }

    #[test]
    fn mixture_weights_members() {
        let lm = lmath();
        let mut set = ModelSet::new(Arc::clone(&lm));
        let half = lm.to_log(0.5);
        let quarter = lm.to_log(0.25);
        set.add(
            synthetic(&lm, &["x"], half + 1),
            "a",
            3.0,
            false,
        )
        .unwrap();
        set.add(
            synthetic(&lm, &["x"], quarter + 1),
            "b",
            1.0,
            false,
        )
        .unwrap();
        // 0.75 * 0.5 + 0.25 * 0.25 = 0.4375
        let p = set.mixture_prob_words("x", &[]);
        assert!((lm.from_log(p.score) - 0.4375).abs() < 1e-3);
        assert_eq!(p.n_used, 1);

        set.set_weight("b", 0.0).unwrap();
        let p = set.mixture_prob_words("x", &[]);
        assert!((lm.from_log(p.score) - 0.5).abs() < 1e-3);
        assert!(set.set_weight("b", -1.0).is_err());
    }
}
