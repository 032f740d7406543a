//! Bounded, time-ordered pose history of a tracked entity.
//!
//! A trajectory is both a log (appended to on every update and exported as a table) and, in
//! offline mode, an input source replayed sample by sample.

use std::{
    collections::{VecDeque, vec_deque},
    fs::File,
    io,
    path::Path,
};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    geometry::Pose,
    types::Timestamp,
};

/// Column schema of exported trajectories.
pub const COLUMNS: [&str; 9] = [
    "Timestamp",
    "x",
    "y",
    "z",
    "qx",
    "qy",
    "qz",
    "qw",
    "Extrapolated",
];

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "Timestamp")]
    pub timestamp: Timestamp,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
    #[serde(rename = "Extrapolated")]
    pub extrapolated: bool,
}

impl Sample {
    pub fn new(timestamp: Timestamp, pose: &Pose, extrapolated: bool) -> Self {
        let [x, y, z, qx, qy, qz, qw] = pose.as_row();
        Self {
            timestamp,
            x,
            y,
            z,
            qx,
            qy,
            qz,
            qw,
            extrapolated,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::from_translation_quaternion([self.x, self.y, self.z], [self.qx, self.qy, self.qz, self.qw])
    }

    fn is_finite(&self) -> bool {
        [
            self.timestamp,
            self.x,
            self.y,
            self.z,
            self.qx,
            self.qy,
            self.qz,
            self.qw,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    fn row(&self) -> [f64; 9] {
        [
            self.timestamp,
            self.x,
            self.y,
            self.z,
            self.qx,
            self.qy,
            self.qz,
            self.qw,
            if self.extrapolated { 1.0 } else { 0.0 },
        ]
    }
}

#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    samples: VecDeque<Sample>,
    limit: Option<usize>,
    cursor: usize,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a trajectory that keeps at most `limit` samples, evicting the oldest first.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(limit.min(4096)),
            limit: Some(limit.max(1)),
            cursor: 0,
        }
    }

    pub fn from_samples<I>(samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut trajectory = Self::new();
        for sample in samples {
            trajectory.push(sample)?;
        }
        Ok(trajectory)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn append(&mut self, timestamp: Timestamp, pose: &Pose, extrapolated: bool) -> Result<()> {
        self.push(Sample::new(timestamp, pose, extrapolated))
    }

    /// Appends a sample. Timestamps must be finite and may repeat but never go backwards; a
    /// rejected sample leaves the buffer untouched.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        if !sample.timestamp.is_finite() {
            return Err(Error::NonFiniteTimestamp(sample.timestamp));
        }
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return Err(Error::NonMonotonicTimestamp {
                    timestamp: sample.timestamp,
                    last: last.timestamp,
                });
            }
        }

        if let Some(limit) = self.limit {
            while self.samples.len() >= limit {
                self.samples.pop_front();
                self.cursor = self.cursor.saturating_sub(1);
            }
        }
        self.samples.push_back(sample);
        Ok(())
    }

    pub fn at(&self, index: usize) -> Result<&Sample> {
        self.samples.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.samples.len(),
        })
    }

    /// Borrowing iterator over the samples in insertion order.
    pub fn iter(&self) -> vec_deque::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Owned copy of the current samples, safe to hold while the trajectory keeps growing.
    pub fn sequence(&self) -> std::vec::IntoIter<Sample> {
        self.snapshot().into_iter()
    }

    /// Owned copy of the samples, for callers that keep appending while they read.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// Position of the replay cursor used by [`Trajectory::next_sample`].
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Returns the sample under the replay cursor and advances it.
    ///
    /// Unlike the iterators, replaying past the end is an error: a replay source running dry in
    /// the middle of an experiment is a caller bug, not a normal end of input.
    pub fn next_sample(&mut self) -> Result<Sample> {
        let sample = self
            .samples
            .get(self.cursor)
            .copied()
            .ok_or(Error::ExhaustedSequence {
                len: self.samples.len(),
            })?;
        self.cursor += 1;
        Ok(sample)
    }

    /// Flat table with the [`COLUMNS`] schema; `Extrapolated` is encoded as 0.0 / 1.0.
    pub fn to_array(&self) -> Array2<f64> {
        let mut table = Array2::zeros((self.samples.len(), COLUMNS.len()));
        for (mut row, sample) in table.outer_iter_mut().zip(self.samples.iter()) {
            for (cell, value) in row.iter_mut().zip(sample.row()) {
                *cell = value;
            }
        }
        table
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        if self.samples.is_empty() {
            writer.write_record(COLUMNS)?;
        }
        for sample in &self.samples {
            writer.serialize(sample)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv<R: io::Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let mut trajectory = Self::new();
        for (row, record) in reader.deserialize::<Sample>().enumerate() {
            let sample = record?;
            if !sample.is_finite() {
                return Err(Error::MalformedRow {
                    row,
                    reason: "non-finite value".to_string(),
                });
            }
            trajectory.push(sample)?;
        }
        Ok(trajectory)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_csv(File::create(path)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_csv(File::open(path)?)
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a Sample;
    type IntoIter = vec_deque::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
