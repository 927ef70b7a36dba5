//! Stream accumulation: turning polled sample blocks into a time-ordered
//! record with a trailing display window.

use biosig_device::{PresetLayout, SampleBlock};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One acquisition tick: named channel values plus absolute timestamp and
/// time since the start of the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRow {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Seconds since the first sample of the recording. Zero for the first
    /// row, non-decreasing afterwards.
    pub time_rel: f64,
    /// One value per channel, in `channels` order.
    pub values: Vec<f64>,
}

/// Time-ordered record of demultiplexed samples for one preset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamRecord {
    pub channels: Vec<String>,
    pub rows: Vec<StreamRow>,
}

impl StreamRecord {
    pub fn new(channels: Vec<String>) -> Self {
        Self {
            channels,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Time span covered by the record, in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.rows.last().map(|row| row.time_rel).unwrap_or(0.0)
    }
}

/// Demultiplex one block against a fixed epoch, without touching an
/// accumulator. Used for the one-shot bulk read of secondary presets.
pub fn demux_with_epoch(block: &SampleBlock, layout: &PresetLayout, epoch: f64) -> StreamRecord {
    let mut record = StreamRecord::new(
        layout
            .channel_names
            .iter()
            .map(|name| name.to_string())
            .collect(),
    );
    for i in 0..block.len() {
        let timestamp = block.timestamps[i];
        record.rows.push(StreamRow {
            timestamp,
            time_rel: timestamp - epoch,
            values: block.channels.iter().map(|ch| ch[i]).collect(),
        });
    }
    record
}

/// Accumulates polled sample blocks into a growing [`StreamRecord`].
///
/// The first appended sample fixes the epoch; every row then carries
/// `time_rel = timestamp - epoch`. Appends are O(new rows) and never re-sort:
/// the device delivers samples in order, and a regressing timestamp is
/// counted as a data-quality problem rather than repaired.
pub struct StreamAccumulator {
    record: StreamRecord,
    epoch: Option<f64>,
    window_seconds: f64,
    regressions: u64,
}

impl StreamAccumulator {
    pub fn new(layout: &PresetLayout, window_seconds: f64) -> Self {
        Self {
            record: StreamRecord::new(
                layout
                    .channel_names
                    .iter()
                    .map(|name| name.to_string())
                    .collect(),
            ),
            epoch: None,
            window_seconds,
            regressions: 0,
        }
    }

    /// Append all columns of a polled block. Returns the number of rows added.
    pub fn append(&mut self, block: &SampleBlock) -> usize {
        if block.channels.len() != self.record.channels.len() {
            warn!(
                got = block.channels.len(),
                expected = self.record.channels.len(),
                "dropping sample block with mismatched channel count"
            );
            return 0;
        }
        let mut appended = 0;
        for i in 0..block.len() {
            let timestamp = block.timestamps[i];
            let epoch = *self.epoch.get_or_insert(timestamp);
            let time_rel = timestamp - epoch;
            if let Some(last) = self.record.rows.last() {
                if time_rel < last.time_rel {
                    self.regressions += 1;
                    warn!(
                        time_rel,
                        previous = last.time_rel,
                        "timestamp regression in stream"
                    );
                }
            }
            self.record.rows.push(StreamRow {
                timestamp,
                time_rel,
                values: block.channels.iter().map(|ch| ch[i]).collect(),
            });
            appended += 1;
        }
        appended
    }

    /// Change the trailing window length. Only the view changes: buffered
    /// history is kept.
    pub fn set_window_seconds(&mut self, seconds: f64) {
        self.window_seconds = seconds.max(0.0);
    }

    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }

    /// Rows with `time_rel` in `[max(0, last - window), last]`: a contiguous
    /// suffix of the buffer. The whole buffer when its span is shorter than
    /// the window.
    pub fn window(&self) -> &[StreamRow] {
        let rows = &self.record.rows;
        let last = match rows.last() {
            Some(row) => row.time_rel,
            None => return rows,
        };
        let cutoff = (last - self.window_seconds).max(0.0);
        let mut start = rows.len();
        while start > 0 && rows[start - 1].time_rel >= cutoff {
            start -= 1;
        }
        &rows[start..]
    }

    /// Cloned snapshot of the current window, as a standalone record.
    pub fn window_record(&self) -> StreamRecord {
        StreamRecord {
            channels: self.record.channels.clone(),
            rows: self.window().to_vec(),
        }
    }

    pub fn record(&self) -> &StreamRecord {
        &self.record
    }

    /// Cloned snapshot of the full buffer.
    pub fn snapshot(&self) -> StreamRecord {
        self.record.clone()
    }

    /// Drop all rows and clear the epoch. Called at the start of every
    /// recording so history cannot leak across recordings.
    pub fn reset(&mut self) {
        self.record.rows.clear();
        self.epoch = None;
        self.regressions = 0;
    }

    /// Absolute timestamp of the first sample of the current recording.
    pub fn epoch(&self) -> Option<f64> {
        self.epoch
    }

    /// Number of timestamp regressions observed since the last reset.
    pub fn regressions(&self) -> u64 {
        self.regressions
    }
}
