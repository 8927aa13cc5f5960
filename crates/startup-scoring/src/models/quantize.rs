//! Feature quantization for histogram-based split finding.
use crate::math::Array2;

/// Per-feature bin boundaries.
///
/// A value `x` falls into bin `b` = number of cuts `<= x`, so "bins `0..=b` go
/// left" is the same test as `x < cuts[b]` on the raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct BinCuts {
    cuts: Vec<Vec<f32>>,
}

impl BinCuts {
    /// Quantile cuts over the columns of `x`, at most `max_bins` bins per feature.
    pub fn from_matrix(x: &Array2<f32>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, u16::MAX as usize);
        let cuts = (0..x.ncols())
            .map(|col| {
                let mut values: Vec<f32> = x.column(col).into_iter().filter(|v| !v.is_nan()).collect();
                values.sort_by(f32::total_cmp);
                values.dedup();
                if values.len() <= max_bins {
                    values.into_iter().skip(1).collect()
                } else {
                    let mut cuts: Vec<f32> = (1..max_bins)
                        .map(|i| values[i * values.len() / max_bins])
                        .collect();
                    cuts.dedup();
                    cuts
                }
            })
            .collect();
        Self { cuts }
    }

    pub fn n_features(&self) -> usize {
        self.cuts.len()
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }

    #[inline]
    pub fn bin(&self, feature: usize, value: f32) -> u16 {
        self.cuts[feature].partition_point(|&c| c <= value) as u16
    }

    /// Raw threshold separating bins `0..=bin` from the rest.
    pub fn threshold(&self, feature: usize, bin: usize) -> f32 {
        self.cuts[feature][bin]
    }

    pub fn quantize(&self, x: &Array2<f32>) -> QuantizedMatrix {
        let mut bins = Vec::with_capacity(x.nrows() * x.ncols());
        for row in x.rows() {
            bins.extend(row.iter().enumerate().map(|(f, &v)| self.bin(f, v)));
        }
        QuantizedMatrix {
            bins,
            cols: x.ncols(),
        }
    }
}

/// Row-major matrix of bin indices.
#[derive(Debug, Clone)]
pub struct QuantizedMatrix {
    bins: Vec<u16>,
    cols: usize,
}

impl QuantizedMatrix {
    #[inline]
    pub fn get(&self, row: usize, feature: usize) -> usize {
        self.bins[row * self.cols + feature] as usize
    }
}
