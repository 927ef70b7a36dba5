//! Visualization plugin describing raw-signal line plots and, when a
//! band-power processing result is available, a summary table.
//!
//! Emits plot *descriptions* (series data plus axis labels) rather
//! than rendered images, so any frontend can draw them.

use serde_json::{json, Map, Value};

use biosig_analysis::protocol::{serve, PluginCall, VISUALIZATION_ENTRY_POINT};

/// Longest series a plot description carries; longer signals are
/// decimated by stride.
const MAX_PLOT_POINTS: usize = 2000;

fn main() -> std::io::Result<()> {
    serve(&[(VISUALIZATION_ENTRY_POINT, visualization_function)])
}

fn visualization_function(call: &PluginCall) -> Result<Value, String> {
    let inputs = call
        .inputs
        .as_object()
        .ok_or_else(|| "inputs must be a mapping".to_string())?;

    let mut plots = Map::new();
    for (label, value) in inputs {
        for (kind, record) in signal_records(value) {
            if let Some(plot) = line_plot(label, &kind, record) {
                plots.insert(format!("{label}_{kind}"), plot);
            }
        }
    }
    if plots.is_empty() {
        return Err("no plottable signal data in the inputs".to_string());
    }

    let mut tables = Map::new();
    if let Some(band_power) = call
        .processing
        .as_ref()
        .and_then(|p| p.get("band_power"))
        .and_then(Value::as_object)
    {
        tables.insert("band_power".to_string(), band_power_table(band_power));
    }

    Ok(json!({ "plots": plots, "tables": tables }))
}

/// Stream records inside an input: every kind of a recording bundle,
/// or the input itself when it already is a record.
fn signal_records(value: &Value) -> Vec<(String, &Value)> {
    if let Some(records) = value.get("records").and_then(Value::as_object) {
        return records.iter().map(|(k, v)| (k.clone(), v)).collect();
    }
    if value.get("rows").is_some() && value.get("channels").is_some() {
        return vec![("signal".to_string(), value)];
    }
    Vec::new()
}

/// Multi-series line plot over relative time, decimated when long.
fn line_plot(label: &str, kind: &str, record: &Value) -> Option<Value> {
    let channels: Vec<&str> = record
        .get("channels")?
        .as_array()?
        .iter()
        .map(|v| v.as_str())
        .collect::<Option<_>>()?;
    let rows = record.get("rows")?.as_array()?;
    if rows.is_empty() {
        return None;
    }
    let stride = (rows.len() / MAX_PLOT_POINTS).max(1);

    let mut x = Vec::new();
    let mut series: Vec<Vec<Value>> = vec![Vec::new(); channels.len()];
    for row in rows.iter().step_by(stride) {
        x.push(row.get("time_rel")?.clone());
        let values = row.get("values")?.as_array()?;
        for (i, value) in values.iter().enumerate().take(channels.len()) {
            series[i].push(value.clone());
        }
    }

    let mut y = Map::new();
    for (name, data) in channels.iter().zip(series) {
        y.insert(name.to_string(), Value::Array(data));
    }
    Some(json!({
        "kind": "line",
        "title": format!("{label} ({kind})"),
        "x_label": "time (s)",
        "x": x,
        "series": y,
    }))
}

/// Band-power mapping pivoted into a row-per-channel table.
fn band_power_table(band_power: &Map<String, Value>) -> Value {
    let bands: Vec<&String> = band_power.keys().collect();
    let mut channels: Vec<String> = band_power
        .values()
        .filter_map(Value::as_object)
        .flat_map(|m| m.keys().cloned())
        .collect();
    channels.sort();
    channels.dedup();

    let rows: Vec<Value> = channels
        .iter()
        .map(|channel| {
            let mut cells = vec![Value::String(channel.clone())];
            for band in &bands {
                cells.push(
                    band_power
                        .get(*band)
                        .and_then(|m| m.get(channel))
                        .cloned()
                        .unwrap_or(Value::Null),
                );
            }
            Value::Array(cells)
        })
        .collect();

    let mut header = vec![Value::String("channel".to_string())];
    header.extend(bands.iter().map(|b| Value::String((*b).clone())));
    json!({ "header": header, "rows": rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_input() -> Value {
        let rows: Vec<Value> = (0..10)
            .map(|i| {
                json!({
                    "timestamp": 100.0 + i as f64 * 0.1,
                    "time_rel": i as f64 * 0.1,
                    "values": [i as f64, -(i as f64)],
                })
            })
            .collect();
        json!({
            "recording": {
                "records": { "eeg": { "channels": ["TP9", "AF7"], "rows": rows } },
                "metadata": { "name": "x", "duration_secs": 0.9 },
            }
        })
    }

    #[test]
    fn plots_are_described_per_kind_with_relative_time() {
        let call = PluginCall {
            entry_point: VISUALIZATION_ENTRY_POINT.into(),
            inputs: bundle_input(),
            processing: None,
        };
        let out = visualization_function(&call).unwrap();
        let plot = &out["plots"]["recording_eeg"];
        assert_eq!(plot["kind"], "line");
        assert_eq!(plot["x"][0], json!(0.0));
        assert_eq!(plot["series"]["AF7"][1], json!(-1.0));
    }

    #[test]
    fn band_power_result_becomes_a_table() {
        let call = PluginCall {
            entry_point: VISUALIZATION_ENTRY_POINT.into(),
            inputs: bundle_input(),
            processing: Some(json!({
                "band_power": {
                    "alpha": { "TP9": 2.0, "AF7": 1.0 },
                    "theta": { "TP9": 0.5, "AF7": 0.25 },
                }
            })),
        };
        let out = visualization_function(&call).unwrap();
        let table = &out["tables"]["band_power"];
        assert_eq!(table["header"][0], "channel");
        assert_eq!(table["rows"][0][0], "AF7");
    }

    #[test]
    fn inputs_without_signals_are_an_error() {
        let call = PluginCall {
            entry_point: VISUALIZATION_ENTRY_POINT.into(),
            inputs: json!({ "notes": { "text": "hello" } }),
            processing: None,
        };
        assert!(visualization_function(&call).is_err());
    }
}
