use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Arg, ArgAction, Command};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use biosig_acquisition::{RecorderHandle, SaveRequest};
use biosig_analysis::{AnalysisWorkspace, PluginHost};
use biosig_device::{create_connector, DeviceKind};

mod config;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "biosigd=debug,biosig_acquisition=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = Command::new("biosigd")
        .about("Biosignal acquisition daemon: record a headset session, persist it, run analysis plugins")
        .arg(
            Arg::new("simulated")
                .long("simulated")
                .action(ArgAction::SetTrue)
                .help("Use the simulated headset instead of real hardware"),
        )
        .arg(
            Arg::new("device")
                .long("device")
                .value_parser(["muse2", "muse-s"])
                .default_value("muse2")
                .help("Headset model to connect to"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .default_value("biosigd.json")
                .help("Daemon configuration file"),
        )
        .arg(
            Arg::new("record-secs")
                .long("record-secs")
                .value_parser(clap::value_parser!(u64))
                .default_value("5")
                .help("How long to record before stopping"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .help("Recording name (defaults to a timestamp)"),
        )
        .arg(Arg::new("subject").long("subject").help("Subject identifier"))
        .arg(
            Arg::new("description")
                .long("description")
                .default_value("")
                .help("Free-form recording description"),
        )
        .arg(
            Arg::new("flat-exports")
                .long("flat-exports")
                .action(ArgAction::SetTrue)
                .help("Also write per-kind CSV exports next to the bundle"),
        )
        .arg(
            Arg::new("processing-plugin")
                .long("processing-plugin")
                .value_name("PATH")
                .help("Processing plugin to run over the saved recording"),
        )
        .arg(
            Arg::new("visualization-plugin")
                .long("visualization-plugin")
                .value_name("PATH")
                .help("Visualization plugin to run after processing"),
        )
        .arg(
            Arg::new("session")
                .long("session")
                .value_name("PATH")
                .help("Save the analysis session to this file when done"),
        )
        .get_matches();

    let config = DaemonConfig::load(Path::new(
        matches.get_one::<String>("config").map(String::as_str).unwrap_or("biosigd.json"),
    ))?;

    let kind = match matches.get_one::<String>("device").map(String::as_str) {
        Some("muse-s") => DeviceKind::MuseS,
        _ => DeviceKind::Muse2,
    };

    let simulated = matches.get_flag("simulated");
    if simulated {
        tracing::info!("using the simulated headset adapter");
    }
    let connector = create_connector(simulated)
        .context("no headset backend available; try --simulated")?;

    let shutdown = CancellationToken::new();
    let recorder = biosig_acquisition::spawn(config.recorder_config(), connector, shutdown.clone());

    let record_secs = *matches
        .get_one::<u64>("record-secs")
        .unwrap_or(&5);
    let saved = run_recording(
        &recorder,
        kind,
        Duration::from_secs(record_secs),
        SaveRequest {
            folder: config.output_dir.clone(),
            name: matches.get_one::<String>("name").cloned(),
            subject_id: matches.get_one::<String>("subject").cloned(),
            description: matches
                .get_one::<String>("description")
                .cloned()
                .unwrap_or_default(),
            flat_exports: matches.get_flag("flat-exports"),
        },
    )
    .await?;

    let processing_plugin = matches.get_one::<String>("processing-plugin").map(PathBuf::from);
    let visualization_plugin = matches
        .get_one::<String>("visualization-plugin")
        .map(PathBuf::from);
    let session_path = matches.get_one::<String>("session").map(PathBuf::from);
    if processing_plugin.is_some() || visualization_plugin.is_some() {
        run_analysis(
            &saved,
            config.plugin_timeout(),
            processing_plugin,
            visualization_plugin,
            session_path,
        )
        .await?;
    } else if session_path.is_some() {
        bail!("--session requires at least one plugin to run");
    }

    shutdown.cancel();
    Ok(())
}

/// Connect, record for the requested duration (or until Ctrl-C), stop
/// and persist.
async fn run_recording(
    recorder: &RecorderHandle,
    kind: DeviceKind,
    duration: Duration,
    request: SaveRequest,
) -> anyhow::Result<biosig_acquisition::SavedRecording> {
    tracing::info!(?kind, "connecting");
    recorder.connect(kind).await.context("connect failed")?;

    recorder.start_recording().await?;
    tracing::info!(secs = duration.as_secs_f64(), "recording");
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping the recording early");
        }
    }

    let window = recorder.window_snapshot().await?;
    tracing::info!(rows = window.len(), channels = window.channels.len(), "live window at stop");

    recorder.stop_recording().await?;
    let saved = recorder.save_recording(request).await?;
    tracing::info!(bundle = %saved.bundle_path.display(), "recording saved");
    recorder.disconnect().await?;
    Ok(saved)
}

/// Feed the saved bundle through the configured plugins and optionally
/// persist the resulting session.
async fn run_analysis(
    saved: &biosig_acquisition::SavedRecording,
    plugin_timeout: Duration,
    processing_plugin: Option<PathBuf>,
    visualization_plugin: Option<PathBuf>,
    session_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut workspace = AnalysisWorkspace::new(PluginHost::new(plugin_timeout));
    workspace
        .load_input("recording", &saved.bundle_path)
        .context("could not load the saved bundle as an analysis input")?;

    if let Some(plugin) = processing_plugin {
        workspace.set_processing_plugin(&plugin);
        let result = workspace.run_processing().await?;
        tracing::info!(plugin = %plugin.display(), result = %result, "processing complete");
    }
    if let Some(plugin) = visualization_plugin {
        workspace.set_visualization_plugin(&plugin);
        let out = workspace.run_visualization().await?;
        tracing::info!(
            plugin = %plugin.display(),
            plots = out.plots.len(),
            tables = out.tables.len(),
            "visualization complete"
        );
    }
    if let Some(path) = session_path {
        workspace.save_session(&path)?;
        tracing::info!(path = %path.display(), "session saved");
    }
    Ok(())
}
