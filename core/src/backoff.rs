//! Recursive backoff scoring over the record tables.
//!
//! For a trigram model and history `[h0, h1]` (most recent first):
//!
//! 1. `(h1, h0, w)` is stored: its probability, `n_used = 3`;
//! 2. otherwise add the backoff weight of bigram `(h1, h0)` (0 if absent)
//!    to the bigram estimate;
//! 3. `(h0, w)` is stored: its probability, `n_used = 2`; otherwise
//!    `bo(h0) + p(w)`, `n_used = 1`.
//!
//! A unigram always exists, so scoring never fails.
use crate::tables::NgramTables;
use crate::vocab::{WordId, OOV_ID};

/// A log-domain score and the length of the n-gram that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NgramScore {
    pub score: i32,
    /// 1 = unigram (possibly after backoff), 2 = bigram, 3 = trigram.
    /// 0 only when no model was consulted.
    pub n_used: u8,
}

impl NgramScore {
    pub fn new(score: i32, n_used: u8) -> Self {
        Self { score, n_used }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffScorer<'a> {
    tables: &'a NgramTables,
    unigram_probs: Option<&'a [i32]>,
}

impl<'a> BackoffScorer<'a> {
    pub fn new(tables: &'a NgramTables) -> Self {
        Self {
            tables,
            unigram_probs: None,
        }
    }

    /// Use `probs[w]` in place of the stored unigram probability of `w`.
    pub fn with_unigram_probs(mut self, probs: &'a [i32]) -> Self {
        self.unigram_probs = Some(probs);
        self
    }

    /// Score `wid` after `hist` (most recent first).
    ///
    /// A target outside the vocabulary is scored as the OOV word; the history
    /// is cut at the first id outside the vocabulary and at `order - 1`.
    pub fn score(&self, wid: WordId, hist: &[WordId]) -> NgramScore {
        let t = self.tables;
        let wid = if t.contains_word(wid) { wid } else { OOV_ID };
        let usable = hist
            .iter()
            .take(t.order() as usize - 1)
            .take_while(|&&w| t.contains_word(w))
            .count();
        match usable {
            0 => self.unigram(wid),
            1 => self.bigram(wid, hist[0]),
            _ => self.trigram(wid, hist[0], hist[1]),
        }
    }

    fn unigram_prob(&self, w: WordId) -> i32 {
        match self.unigram_probs.and_then(|p| p.get(w as usize)) {
            Some(&p) => p,
            None => self.tables.unigram(w).prob,
        }
    }

    fn unigram(&self, w: WordId) -> NgramScore {
        NgramScore::new(self.unigram_prob(w), 1)
    }

    fn bigram(&self, w: WordId, h0: WordId) -> NgramScore {
        let t = self.tables;
        match t.find_bigram(h0, w) {
            Some(i) => NgramScore::new(t.bigram(i).prob, 2),
            None => {
                let bo = t.unigram(h0).backoff;
                NgramScore::new(bo.saturating_add(self.unigram_prob(w)), 1)
            }
        }
    }

    fn trigram(&self, w: WordId, h0: WordId, h1: WordId) -> NgramScore {
        let t = self.tables;
        let Some(ctx) = t.find_bigram(h1, h0) else {
            return self.bigram(w, h0);
        };
        if let Some(i) = t.find_trigram(ctx, w) {
            return NgramScore::new(t.trigram(i).prob, 3);
        }
        let lower = self.bigram(w, h0);
        NgramScore::new(t.bigram(ctx).backoff.saturating_add(lower.score), lower.n_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::RawNgram;

    // 0=<UNK> 1=a 2=b 3=c
    fn tables() -> NgramTables {
        NgramTables::build(
            3,
            vec![(-1000, -1), (-100, -10), (-200, -20), (-300, -30)],
            vec![RawNgram::bigram(1, 2, -40, -4), RawNgram::bigram(2, 3, -50, -5)],
            vec![RawNgram::trigram(1, 2, 3, -7)],
        )
        .unwrap()
    }

    #[test]
    fn walks_down_the_orders() {
        let t = tables();
        let s = BackoffScorer::new(&t);
        // a b c
        assert_eq!(s.score(3, &[2, 1]), NgramScore::new(-7, 3));
        // c b a -> (b, a) missing, bo(c, b) absent -> bo(b) + p(a)
        assert_eq!(s.score(1, &[2, 3]), NgramScore::new(-20 + -100, 1));
        // a b a -> bo(a b) + bo(b) + p(a)
        assert_eq!(s.score(1, &[2, 1]), NgramScore::new(-4 + -20 + -100, 1));
        // x b c with x unseen context -> bigram (b, c)
        assert_eq!(s.score(3, &[2, 0]), NgramScore::new(-50, 2));
        assert_eq!(s.score(2, &[]), NgramScore::new(-200, 1));
    }

    #[test]
    fn invalid_ids_are_normalized() {
        let t = tables();
        let s = BackoffScorer::new(&t);
        assert_eq!(s.score(99, &[]), NgramScore::new(-1000, 1));
        // history stops at the first out-of-range id
        assert_eq!(s.score(3, &[2, 99]), s.score(3, &[2]));
        assert_eq!(s.score(3, &[99, 1]), s.score(3, &[]));
        // and at order - 1
        assert_eq!(s.score(3, &[2, 1, 3, 3]), s.score(3, &[2, 1]));
    }

    #[test]
    fn unigram_override() {
        let t = tables();
        let probs = [-1, -2, -3, -4];
        let s = BackoffScorer::new(&t).with_unigram_probs(&probs);
        assert_eq!(s.score(2, &[]), NgramScore::new(-3, 1));
        assert_eq!(s.score(1, &[3]), NgramScore::new(-30 + -2, 1));
        // stored n-grams are unaffected
        assert_eq!(s.score(2, &[1]), NgramScore::new(-40, 2));
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let t = NgramTables::build(2, vec![(i32::MIN, i32::MIN), (i32::MIN, 0)], vec![], vec![])
            .unwrap();
        let s = BackoffScorer::new(&t);
        assert_eq!(s.score(1, &[0]).score, i32::MIN);
    }
}
