//! Value quantization for the binary model format.
//!
//! Bigram and trigram values in a DMP file are stored as 16-bit indices into
//! a shared table of representative values. When a column has no more
//! distinct values than the table can hold the table is exact; otherwise
//! values are split into equal-population bins and each bin is represented
//! by its mean.
use crate::error::{LmError, LmResult};

/// Largest table index width supported by the on-disk records.
pub const MAX_QUANT_BITS: u32 = 16;

/// Sorted table of representative values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantizer {
    centers: Vec<i32>,
}

impl Quantizer {
    /// Fit a table of at most `2^bits` entries to `values`.
    pub fn train(values: &[i32], bits: u32) -> LmResult<Self> {
        if bits == 0 || bits > MAX_QUANT_BITS {
            return Err(LmError::config(format!(
                "quantization bits must be in 1..={}, got {}",
                MAX_QUANT_BITS, bits
            )));
        }
        let n_bins = 1usize << bits;

        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        let mut distinct = sorted.clone();
        distinct.dedup();
        if distinct.is_empty() {
            return Ok(Self { centers: vec![0] });
        }
        if distinct.len() <= n_bins {
            return Ok(Self { centers: distinct });
        }

        let mut centers = Vec::with_capacity(n_bins);
        for bin in 0..n_bins {
            let start = bin * sorted.len() / n_bins;
            let end = (bin + 1) * sorted.len() / n_bins;
            if start == end {
                continue;
            }
            let sum: i64 = sorted[start..end].iter().map(|&v| v as i64).sum();
            centers.push((sum / (end - start) as i64) as i32);
        }
        centers.dedup();
        Ok(Self { centers })
    }

    /// Wrap a table read back from disk.
    pub fn from_centers(centers: Vec<i32>) -> LmResult<Self> {
        if centers.is_empty() || centers.len() > 1 << MAX_QUANT_BITS {
            return Err(LmError::format(format!(
                "quantization table has {} entries",
                centers.len()
            )));
        }
        Ok(Self { centers })
    }

    pub fn centers(&self) -> &[i32] {
        &self.centers
    }

    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    /// Index of the center nearest to `value`.
    pub fn encode(&self, value: i32) -> u16 {
        let idx = self.centers.partition_point(|&c| c < value);
        if idx == 0 {
            return 0;
        }
        if idx == self.centers.len() {
            return (idx - 1) as u16;
        }
        let below = value as i64 - self.centers[idx - 1] as i64;
        let above = self.centers[idx] as i64 - value as i64;
        if below <= above {
            (idx - 1) as u16
        } else {
            idx as u16
        }
    }

    pub fn decode(&self, idx: u16) -> Option<i32> {
        self.centers.get(idx as usize).copied()
    }

    /// Largest absolute change `encode` + `decode` makes to any of `values`.
    pub fn max_error(&self, values: &[i32]) -> u32 {
        values
            .iter()
            .map(|&v| {
                let q = self.centers[self.encode(v) as usize];
                (v as i64 - q as i64).unsigned_abs() as u32
            })
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn few_distinct_values_are_exact() {
        let values = [-5, -1, -5, -300, 0, -1];
        let q = Quantizer::train(&values, 2).unwrap();
        assert_eq!(q.centers(), &[-300, -5, -1, 0]);
        assert_eq!(q.max_error(&values), 0);
        for &v in &values {
            assert_eq!(q.decode(q.encode(v)), Some(v));
        }
    }

    #[test]
    fn many_values_use_equal_population_bins() {
        let values: Vec<i32> = (0..100).map(|i| -i * 10).collect();
        let q = Quantizer::train(&values, 2).unwrap();
        assert_eq!(q.len(), 4);
        // each bin holds 25 consecutive values spaced by 10
        assert_eq!(q.centers(), &[-870, -620, -370, -120]);
        assert!(q.max_error(&values) <= 125);
    }

    #[test]
    fn encode_picks_nearest_center() {
        let q = Quantizer::from_centers(vec![-100, 0, 50]).unwrap();
        assert_eq!(q.encode(-1000), 0);
        assert_eq!(q.encode(-51), 0);
        assert_eq!(q.encode(-49), 1);
        assert_eq!(q.encode(26), 2);
        assert_eq!(q.encode(1000), 2);
        assert_eq!(q.decode(3), None);
    }

    #[test]
    fn empty_input_and_bad_widths() {
        let q = Quantizer::train(&[], 16).unwrap();
        assert_eq!(q.centers(), &[0]);
        assert!(Quantizer::train(&[1], 0).is_err());
        assert!(Quantizer::train(&[1], 17).is_err());
        assert!(Quantizer::from_centers(vec![]).is_err());
    }
}
