//! Ground-truth assembly: feature matrix plus one label vector per target.
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::features::FeatureExtractor;
use crate::io::read_records_csv;
use crate::labeler::label_record;
use crate::math::Array2;
use crate::record::RawRecord;
use crate::target::Target;

#[derive(Debug, Clone)]
pub struct GroundTruth {
    pub ids: Vec<String>,
    pub x: Array2<f32>,
    pub labels: BTreeMap<Target, Vec<f32>>,
    pub feature_names: Vec<String>,
}

impl GroundTruth {
    /// Proxy-label and featurise every record.
    pub fn from_records(records: &[RawRecord], extractor: &FeatureExtractor) -> Self {
        let x = extractor.extract_batch(records);
        let mut labels: BTreeMap<Target, Vec<f32>> = Target::ALL
            .iter()
            .map(|&t| (t, Vec::with_capacity(records.len())))
            .collect();
        for record in records {
            let proxy = label_record(record);
            for (target, values) in labels.iter_mut() {
                values.push(proxy.get(*target) as f32);
            }
        }
        Self {
            ids: records.iter().map(RawRecord::record_id).collect(),
            x,
            labels,
            feature_names: extractor.feature_names(),
        }
    }

    /// Load the canonical dataset from a CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P, extractor: &FeatureExtractor) -> Result<Self> {
        let records = read_records_csv(path)?;
        let data = Self::from_records(&records, extractor);
        log::info!(
            "Loaded ground truth: {} samples x {} features",
            data.len(),
            data.x.ncols()
        );
        Ok(data)
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn labels(&self, target: Target) -> &[f32] {
        self.labels.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn subset(&self, indices: &[usize]) -> GroundTruth {
        GroundTruth {
            ids: indices.iter().map(|&i| self.ids[i].clone()).collect(),
            x: self.x.select_rows(indices),
            labels: self
                .labels
                .iter()
                .map(|(&t, values)| (t, indices.iter().map(|&i| values[i]).collect()))
                .collect(),
            feature_names: self.feature_names.clone(),
        }
    }

    /// Seeded shuffle split into `(train, holdout)` row indices, each sorted.
    /// At least one row is held out whenever there are two or more rows.
    pub fn holdout_split(&self, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
        let n = self.len();
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        let n_test = if n < 2 {
            0
        } else {
            ((n as f64 * fraction).round() as usize).clamp(1, n - 1)
        };
        let mut test = indices[..n_test].to_vec();
        let mut train = indices[n_test..].to_vec();
        test.sort_unstable();
        train.sort_unstable();
        (train, test)
    }
}
