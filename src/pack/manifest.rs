//! Time index for a shuffled segment file.
//!
//! Records are shuffled before they are written, so a time range is not a
//! contiguous byte range. The manifest carries `index`, the record positions
//! sorted by start time, and `buckets`, hour-long slices of that index.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntry {
    /// Bucket start, unix seconds.
    pub epoch: i64,
    /// First slot in `SubsetManifest::index`.
    pub first: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetManifest {
    /// Floats per record.
    pub stride: usize,
    pub record_count: usize,
    /// Stored times are seconds relative to this unix time.
    pub epoch_base: i64,
    pub bucket_seconds: i64,
    pub buckets: Vec<BucketEntry>,
    pub index: Vec<u32>,
}

impl SubsetManifest {
    /// `start_epochs[i]` is the start time of record `i` as written.
    pub fn build(start_epochs: &[i64], stride: usize, epoch_base: i64, bucket_seconds: i64) -> Self {
        let mut index: Vec<u32> = (0..start_epochs.len() as u32).collect();
        index.sort_by_key(|&i| start_epochs[i as usize]);

        let mut buckets: Vec<BucketEntry> = Vec::new();
        for (slot, &record) in index.iter().enumerate() {
            let epoch = start_epochs[record as usize].div_euclid(bucket_seconds) * bucket_seconds;
            match buckets.last_mut() {
                Some(bucket) if bucket.epoch == epoch => bucket.count += 1,
                _ => buckets.push(BucketEntry {
                    epoch,
                    first: slot,
                    count: 1,
                }),
            }
        }

        Self {
            stride,
            record_count: start_epochs.len(),
            epoch_base,
            bucket_seconds,
            buckets,
            index,
        }
    }

    /// Record positions whose start falls in `[from, to)` bucket-wise.
    pub fn records_between(&self, from_epoch: i64, to_epoch: i64) -> Vec<u32> {
        self.buckets
            .iter()
            .filter(|b| b.epoch + self.bucket_seconds > from_epoch && b.epoch < to_epoch)
            .flat_map(|b| self.index[b.first..b.first + b.count].iter().copied())
            .collect()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), super::PackError> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, super::PackError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
