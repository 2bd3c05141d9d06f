//! Table-free models scored by a function.
//!
//! Used where a real model is unavailable or unnecessary: uniform baselines,
//! constant-score fixtures, or hand-written scoring rules.
use std::fmt;

use crate::backoff::NgramScore;
use crate::error::{LmError, LmResult};
use crate::logmath::LogMath;
use crate::tables::MAX_ORDER;
use crate::vocab::WordId;

type ScoreFn = dyn Fn(WordId, &[WordId]) -> NgramScore + Send + Sync;

/// A scoring function plus the order it claims.
///
/// The function receives an in-vocabulary target and a history already cut
/// to `order - 1` in-vocabulary ids, most recent first.
pub struct SyntheticLm {
    order: u8,
    scorer: Box<ScoreFn>,
}

impl SyntheticLm {
    /// Fails with `LmError::Configuration` unless `order` is in `1..=3`.
    pub fn new<F>(order: u8, scorer: F) -> LmResult<Self>
    where
        F: Fn(WordId, &[WordId]) -> NgramScore + Send + Sync + 'static,
    {
        if !(1..=MAX_ORDER).contains(&order) {
            return Err(LmError::config(format!(
                "synthetic model order must be in 1..={}, got {}",
                MAX_ORDER, order
            )));
        }
        Ok(Self {
            order,
            scorer: Box::new(scorer),
        })
    }

    /// Every word scores `score` as a unigram, whatever the history.
    pub fn constant(score: i32) -> Self {
        Self {
            order: 1,
            scorer: Box::new(move |_, _| NgramScore::new(score, 1)),
        }
    }

    /// `log(1 / n_words)` for every word.
    pub fn uniform(lmath: &LogMath, n_words: usize) -> Self {
        let score = lmath.to_log(1.0 / n_words.max(1) as f64);
        Self::constant(score)
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    pub fn score(&self, wid: WordId, hist: &[WordId]) -> NgramScore {
        (self.scorer)(wid, hist)
    }
}

impl fmt::Debug for SyntheticLm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticLm")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_ignores_history() {
        let lm = SyntheticLm::constant(-19460);
        assert_eq!(lm.score(3, &[1, 2]), NgramScore::new(-19460, 1));
        assert_eq!(lm.order(), 1);
    }

    #[test]
    fn uniform_is_log_of_reciprocal() {
        let lmath = LogMath::new(1.0001, 0, true).unwrap();
        let lm = SyntheticLm::uniform(&lmath, 10);
        assert_eq!(lm.score(0, &[]).score, lmath.to_log(0.1));
    }

    #[test]
    fn custom_function_sees_history() {
        let lm = SyntheticLm::new(3, |w, h| NgramScore::new(-(w as i32) - h.len() as i32, h.len() as u8 + 1)).unwrap();
        assert_eq!(lm.order(), 3);
        assert_eq!(lm.score(4, &[1, 1]), NgramScore::new(-6, 3));
    }

    #[test]
    fn out_of_range_orders_are_rejected() {
        for order in [0, 4, 5] {
            let err = SyntheticLm::new(order, |_, _| NgramScore::new(0, 1)).unwrap_err();
            assert!(matches!(err, LmError::Configuration(_)), "order {}", order);
        }
    }
}
