//! Recording bundles: the durable artifact of one completed recording.

use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use biosig_device::Preset;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BundleLoadError, PersistError};
use crate::stream::StreamRecord;

/// Label for one kind of recorded data inside a bundle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Eeg,
    Imu,
    Ppg,
}

impl From<Preset> for DataKind {
    fn from(preset: Preset) -> Self {
        match preset {
            Preset::Primary => DataKind::Eeg,
            Preset::Auxiliary => DataKind::Imu,
            Preset::Ancillary => DataKind::Ppg,
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::Eeg => write!(f, "eeg"),
            DataKind::Imu => write!(f, "imu"),
            DataKind::Ppg => write!(f, "ppg"),
        }
    }
}

/// Descriptive metadata stored with every bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub name: String,
    pub subject_id: Option<String>,
    pub description: String,
    pub duration_secs: f64,
    pub created: DateTime<Local>,
}

/// All data kinds of one completed recording plus metadata. Immutable once
/// saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingBundle {
    pub records: BTreeMap<DataKind, StreamRecord>,
    pub metadata: RecordingMetadata,
}

impl RecordingBundle {
    pub fn record(&self, kind: DataKind) -> Option<&StreamRecord> {
        self.records.get(&kind)
    }

    /// True when no kind carries any rows (metadata-only placeholder).
    pub fn is_empty(&self) -> bool {
        self.records.values().all(|record| record.is_empty())
    }
}

/// Paths written by a successful save.
#[derive(Debug, Clone)]
pub struct SavedRecording {
    pub bundle_path: PathBuf,
    pub csv_paths: Vec<PathBuf>,
    pub description_path: Option<PathBuf>,
}

/// Default recording name, derived from the wall clock.
pub fn default_recording_name() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Persist a bundle under `folder`.
///
/// Layout: `<folder>[/<subject_id>]/<name>.data` plus optional flat exports
/// (`<name>_<kind>.csv` per non-empty kind) and `<name>_description.txt` when
/// a description was provided. The bundle file is written last, via a
/// temporary file renamed into place, so a present `.data` file is never
/// partial.
pub fn save_bundle(
    bundle: &RecordingBundle,
    folder: &Path,
    flat_exports: bool,
) -> Result<SavedRecording, PersistError> {
    let save_dir = match bundle.metadata.subject_id.as_deref() {
        Some(subject) if !subject.is_empty() => folder.join(subject),
        _ => folder.to_path_buf(),
    };
    create_dir_all(&save_dir)?;

    let name = &bundle.metadata.name;
    let mut csv_paths = Vec::new();
    if flat_exports {
        for (kind, record) in &bundle.records {
            if record.is_empty() {
                continue;
            }
            let csv_path = save_dir.join(format!("{name}_{kind}.csv"));
            write_record_csv(record, &csv_path)?;
            csv_paths.push(csv_path);
        }
    }

    let description_path = if bundle.metadata.description.is_empty() {
        None
    } else {
        let path = save_dir.join(format!("{name}_description.txt"));
        std::fs::write(&path, &bundle.metadata.description)?;
        Some(path)
    };

    let bundle_path = save_dir.join(format!("{name}.data"));
    let tmp_path = save_dir.join(format!("{name}.data.tmp"));
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, bundle)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, &bundle_path)?;

    info!(path = %bundle_path.display(), "recording saved");
    Ok(SavedRecording {
        bundle_path,
        csv_paths,
        description_path,
    })
}

/// Load a previously saved bundle.
pub fn load_bundle(path: &Path) -> Result<RecordingBundle, BundleLoadError> {
    let file = File::open(path)?;
    let bundle = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(bundle)
}

fn write_record_csv(record: &StreamRecord, path: &Path) -> Result<(), PersistError> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<&str> = record.channels.iter().map(String::as_str).collect();
    header.push("timestamp");
    header.push("time_rel");
    writer.write_record(&header)?;
    for row in &record.rows {
        let mut fields: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        fields.push(row.timestamp.to_string());
        fields.push(row.time_rel.to_string());
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}
