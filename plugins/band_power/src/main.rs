//! Processing plugin computing per-channel EEG band powers.
//!
//! Accepts either a recording bundle (the `.data` JSON written by the
//! acquisition side) or a plain column-oriented mapping of channel
//! name to sample array, and returns absolute power in the classic
//! delta through gamma bands.

use std::collections::BTreeMap;

use apodize::hanning_iter;
use rustfft::{num_complex::Complex, FftPlanner};
use serde_json::{json, Value};

use biosig_analysis::protocol::{serve, PluginCall, PROCESSING_ENTRY_POINT};

const DEFAULT_SAMPLE_RATE_HZ: f64 = 256.0;
const MAX_FFT_SIZE: usize = 1024;

const BANDS: &[(&str, f64, f64)] = &[
    ("delta", 1.0, 4.0),
    ("theta", 4.0, 8.0),
    ("alpha", 8.0, 13.0),
    ("beta", 13.0, 30.0),
    ("gamma", 30.0, 50.0),
];

fn main() -> std::io::Result<()> {
    serve(&[(PROCESSING_ENTRY_POINT, processing_function)])
}

fn processing_function(call: &PluginCall) -> Result<Value, String> {
    let inputs = call
        .inputs
        .as_object()
        .ok_or_else(|| "inputs must be a mapping".to_string())?;
    let (label, channels) = inputs
        .iter()
        .find_map(|(label, value)| extract_channels(value).map(|c| (label, c)))
        .ok_or_else(|| "no input carries EEG channel data".to_string())?;

    let sample_rate = inputs
        .values()
        .find_map(|v| v.get("sample_rate_hz").and_then(Value::as_f64))
        .unwrap_or(DEFAULT_SAMPLE_RATE_HZ);

    let mut band_power: BTreeMap<&str, BTreeMap<String, f64>> = BTreeMap::new();
    let mut samples_used = 0usize;
    for (channel, samples) in &channels {
        if samples.len() < 8 {
            return Err(format!(
                "channel '{channel}' has only {} samples, need at least 8",
                samples.len()
            ));
        }
        let spectrum = power_spectrum(samples);
        samples_used = samples.len().min(MAX_FFT_SIZE);
        let bin_hz = sample_rate / samples_used as f64;
        for (band, low, high) in BANDS {
            let power: f64 = spectrum
                .iter()
                .enumerate()
                .filter(|(i, _)| {
                    let freq = *i as f64 * bin_hz;
                    freq >= *low && freq < *high
                })
                .map(|(_, p)| p)
                .sum();
            band_power
                .entry(*band)
                .or_default()
                .insert(channel.clone(), power);
        }
    }

    Ok(json!({
        "band_power": band_power,
        "source": label,
        "sample_rate_hz": sample_rate,
        "samples_used": samples_used,
    }))
}

/// One-shot Hann-windowed periodogram over the trailing samples.
fn power_spectrum(samples: &[f64]) -> Vec<f64> {
    let n = samples.len().min(MAX_FFT_SIZE);
    let tail = &samples[samples.len() - n..];
    let window: Vec<f64> = hanning_iter(n).collect();
    let mut buffer: Vec<Complex<f64>> = tail
        .iter()
        .zip(&window)
        .map(|(s, w)| Complex::new(s * w, 0.0))
        .collect();
    FftPlanner::new().plan_fft_forward(n).process(&mut buffer);
    let s2: f64 = window.iter().map(|w| w * w).sum();
    buffer
        .iter()
        .take(n / 2 + 1)
        .map(|c| c.norm_sqr() / s2)
        .collect()
}

/// Pulls `{channel: samples}` out of a value that is either a recording
/// bundle or already column oriented. Timestamp columns are skipped.
fn extract_channels(value: &Value) -> Option<BTreeMap<String, Vec<f64>>> {
    if let Some(record) = value.pointer("/records/eeg") {
        return record_channels(record);
    }
    let object = value.as_object()?;
    let mut channels = BTreeMap::new();
    for (name, column) in object {
        if name == "timestamp" || name == "time_rel" {
            continue;
        }
        let samples: Option<Vec<f64>> = column
            .as_array()?
            .iter()
            .map(Value::as_f64)
            .collect();
        channels.insert(name.clone(), samples?);
    }
    if channels.is_empty() || channels.values().any(Vec::is_empty) {
        None
    } else {
        Some(channels)
    }
}

/// Columnar view of a stream record's row-major `values`.
fn record_channels(record: &Value) -> Option<BTreeMap<String, Vec<f64>>> {
    let names: Vec<&str> = record
        .get("channels")?
        .as_array()?
        .iter()
        .map(|v| v.as_str())
        .collect::<Option<_>>()?;
    let rows = record.get("rows")?.as_array()?;
    if rows.is_empty() {
        return None;
    }
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(rows.len()); names.len()];
    for row in rows {
        let values = row.get("values")?.as_array()?;
        for (i, value) in values.iter().enumerate().take(names.len()) {
            columns[i].push(value.as_f64()?);
        }
    }
    Some(
        names
            .iter()
            .map(|n| n.to_string())
            .zip(columns)
            .collect(),
    )
}
