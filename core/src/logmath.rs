//! Fixed-base logarithmic arithmetic.
//!
//! Every probability in the engine is an `i32` logarithm in base `B`
//! (typically 1.0001), right-shifted by `shift` bits. Working in integers
//! turns multiplication into addition; addition of probabilities uses a
//! precomputed correction table so the scoring path never calls `exp`/`ln`.
//!
//! A `LogMath` is immutable once built and is shared by `Arc` between every
//! model that was loaded against it.
//!
//! # Example
//! ```
//! use liblm_core::LogMath;
//!
//! let lmath = LogMath::new(1.0001, 0, true).unwrap();
//! let half = lmath.to_log(0.5);
//! // 0.5 + 0.5 == 1.0, give or take one unit of rounding
//! assert!(lmath.add(half, half).abs() <= 1);
//! ```
use crate::error::{LmError, LmResult};

/// Largest supported shift. Larger shifts leave too few significant bits.
pub const MAX_SHIFT: u32 = 16;

/// Logarithmic arithmetic context.
#[derive(Debug, Clone)]
pub struct LogMath {
    base: f64,
    shift: u32,
    log_of_base: f64,
    inv_log_of_base: f64,
    inv_log10_of_base: f64,
    zero: i32,
    /// `table[d] = log_B(1 + B^-(d << shift)) >> shift`, rounded.
    table: Option<Box<[u32]>>,
}

impl LogMath {
    /// Create a context for base `base`.
    ///
    /// Fails with `LmError::Configuration` when `base <= 1.0`, when the base
    /// is not finite, or when `shift` exceeds [`MAX_SHIFT`].
    pub fn new(base: f64, shift: u32, use_table: bool) -> LmResult<Self> {
        if !base.is_finite() || base <= 1.0 {
            return Err(LmError::config(format!(
                "log base must be finite and > 1.0, got {}",
                base
            )));
        }
        if shift > MAX_SHIFT {
            return Err(LmError::config(format!(
                "log shift must be <= {}, got {}",
                MAX_SHIFT, shift
            )));
        }

        let log_of_base = base.ln();
        let inv_log_of_base = 1.0 / log_of_base;
        let inv_log10_of_base = 1.0 / base.log10();
        let zero = i32::MIN >> (shift + 2);

        let mut lmath = Self {
            base,
            shift,
            log_of_base,
            inv_log_of_base,
            inv_log10_of_base,
            zero,
            table: None,
        };
        if use_table {
            let table = lmath.build_table();
            tracing::debug!(base, shift, entries = table.len(), "built log-add table");
            lmath.table = Some(table.into_boxed_slice());
        }
        Ok(lmath)
    }

    fn build_table(&self) -> Vec<u32> {
        let mut table = Vec::new();
        let mut d: u64 = 0;
        loop {
            let k = self.add_correction(d);
            if k <= 0 {
                break;
            }
            table.push(k as u32);
            d += 1;
        }
        table
    }

    /// `log_B(1 + B^-(d << shift))`, rounded and shifted.
    fn add_correction(&self, d: u64) -> i64 {
        let step = (1u64 << self.shift) as f64;
        let byx = (-(d as f64) * step * self.log_of_base).exp();
        let lobyx = (1.0 + byx).ln() * self.inv_log_of_base;
        ((lobyx + 0.5 * step) as i64) >> self.shift
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Whether additions go through the precomputed table.
    pub fn uses_table(&self) -> bool {
        self.table.is_some()
    }

    /// Number of entries in the addition table (0 without a table).
    pub fn table_len(&self) -> usize {
        self.table.as_ref().map_or(0, |t| t.len())
    }

    /// The log-domain value standing in for probability zero.
    ///
    /// Small enough to dominate any real score, large enough that adding a
    /// handful of them does not overflow an `i32`.
    pub fn zero(&self) -> i32 {
        self.zero
    }

    fn clamp(&self, v: i32) -> i32 {
        v.max(self.zero)
    }

    /// Convert a linear probability to the log domain.
    pub fn to_log(&self, p: f64) -> i32 {
        if !(p > 0.0) {
            return self.zero;
        }
        self.clamp(((p.ln() * self.inv_log_of_base) as i32) >> self.shift)
    }

    /// Convert a log-domain value back to a linear probability.
    pub fn from_log(&self, logval: i32) -> f64 {
        if logval <= self.zero {
            return 0.0;
        }
        (self.unshift(logval) * self.log_of_base).exp()
    }

    /// Convert a base-10 logarithm (as written in ARPA files).
    ///
    /// Equal to `to_log(10f64.powf(log10))` but without the intermediate
    /// power, so values like -99 do not underflow.
    pub fn log10_to_log(&self, log10: f64) -> i32 {
        self.clamp(((log10 * self.inv_log10_of_base) as i32) >> self.shift)
    }

    /// Convert a log-domain value to a base-10 logarithm.
    pub fn log_to_log10(&self, logval: i32) -> f64 {
        self.unshift(logval) / self.inv_log10_of_base
    }

    /// Convert a natural logarithm to the log domain.
    pub fn ln_to_log(&self, ln: f64) -> i32 {
        self.clamp(((ln * self.inv_log_of_base) as i32) >> self.shift)
    }

    /// Convert a log-domain value to a natural logarithm.
    pub fn log_to_ln(&self, logval: i32) -> f64 {
        self.unshift(logval) * self.log_of_base
    }

    fn unshift(&self, logval: i32) -> f64 {
        logval as f64 * (1u64 << self.shift) as f64
    }

    /// `log(a + b)` given `log a` and `log b`.
    pub fn add(&self, log_a: i32, log_b: i32) -> i32 {
        if log_a <= self.zero {
            return log_b;
        }
        if log_b <= self.zero {
            return log_a;
        }
        let (hi, lo) = if log_a > log_b {
            (log_a, log_b)
        } else {
            (log_b, log_a)
        };
        let d = (hi as i64 - lo as i64) as u64;
        let correction = match &self.table {
            Some(table) => match table.get(d as usize) {
                Some(&k) => k as i64,
                None => 0,
            },
            None => self.add_correction(d).max(0),
        };
        (hi as i64 + correction).min(i32::MAX as i64) as i32
    }

    /// `log(a - b)` given `log a` and `log b`.
    ///
    /// When `a <= b` the difference is not a positive probability and the
    /// [`zero`](Self::zero) sentinel is returned.
    pub fn subtract(&self, log_a: i32, log_b: i32) -> i32 {
        if log_b <= self.zero {
            return log_a;
        }
        if log_a <= log_b {
            return self.zero;
        }
        let step = (1u64 << self.shift) as f64;
        let d = (log_a as i64 - log_b as i64) as f64 * step;
        let r = (1.0 - (-d * self.log_of_base).exp()).ln() * self.inv_log_of_base;
        let v = log_a as i64 + ((r as i64) >> self.shift);
        if v <= self.zero as i64 {
            self.zero
        } else {
            v as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lmath() -> LogMath {
        LogMath::new(1.0001, 0, true).expect("valid base")
    }

    #[test]
    fn rejects_base_not_above_one() {
        assert!(matches!(
            LogMath::new(1.0, 0, true),
            Err(LmError::Configuration(_))
        ));
        assert!(matches!(
            LogMath::new(0.5, 0, false),
            Err(LmError::Configuration(_))
        ));
        assert!(matches!(
            LogMath::new(f64::NAN, 0, false),
            Err(LmError::Configuration(_))
        ));
        assert!(LogMath::new(1.0001, MAX_SHIFT + 1, false).is_err());
    }

    #[test]
    fn linear_round_trip_is_close() {
        let lm = lmath();
        for &p in &[1.0, 0.5, 0.1, 1e-3, 1e-7] {
            let back = lm.from_log(lm.to_log(p));
            assert!((back - p).abs() / p < 1e-3, "p={} back={}", p, back);
        }
        assert_eq!(lm.to_log(1.0), 0);
        assert_eq!(lm.to_log(0.0), lm.zero());
        assert_eq!(lm.from_log(lm.zero()), 0.0);
    }

    #[test]
    fn log10_conversion_matches_arpa_values() {
        let lm = lmath();
        assert_eq!(lm.log10_to_log(-3.2721), -75346);
        assert_eq!(lm.log10_to_log(-1.0), -23027);
        assert_eq!(lm.log10_to_log(0.0), 0);
        assert!((lm.log_to_log10(-23027) + 1.0).abs() < 1e-4);
    }

    #[test]
    fn table_starts_at_log_two() {
        let lm = lmath();
        // log_1.0001(2) = 6931.8...
        assert_eq!(lm.add(0, 0), 6932);
        assert!(lm.table_len() > 90_000);
    }

    #[test]
    fn add_with_and_without_table_agree() {
        let with = lmath();
        let without = LogMath::new(1.0001, 0, false).unwrap();
        for &(a, b) in &[(0, 0), (-100, -5000), (-23027, -46054), (-1, -200_000)] {
            assert_eq!(with.add(a, b), without.add(a, b), "a={} b={}", a, b);
        }
    }

    #[test]
    fn add_handles_zero_and_far_apart_values() {
        let lm = lmath();
        let x = lm.to_log(0.25);
        assert_eq!(lm.add(x, lm.zero()), x);
        assert_eq!(lm.add(lm.zero(), x), x);
        // beyond the table the smaller term vanishes
        assert_eq!(lm.add(0, -2_000_000), 0);
    }

    #[test]
    fn add_sums_linear_probabilities() {
        let lm = lmath();
        let sum = lm.add(lm.to_log(0.3), lm.to_log(0.2));
        assert!((lm.from_log(sum) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn subtract_returns_sentinel_when_not_positive() {
        let lm = lmath();
        let a = lm.to_log(0.3);
        assert_eq!(lm.subtract(a, a), lm.zero());
        assert_eq!(lm.subtract(lm.to_log(0.1), a), lm.zero());
        let diff = lm.subtract(lm.to_log(0.5), lm.to_log(0.2));
        assert!((lm.from_log(diff) - 0.3).abs() < 1e-3);
    }

    #[test]
    fn shift_scales_values() {
        let lm = LogMath::new(1.0001, 10, true).unwrap();
        let l = lm.to_log(0.1);
        assert_eq!(l, (-23027 >> 10));
        assert!((lm.from_log(l) - 0.1).abs() < 0.01);
        let half = lm.to_log(0.5);
        assert!((lm.from_log(lm.add(half, half)) - 1.0).abs() < 0.1);
    }
}
