#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod classifier;
mod config;
mod gesture;
mod model_download;
mod pipeline;
mod session;
mod types;
mod ui;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, unbounded};
use gpui::Application;

use crate::{
    classifier::KnnClassifier,
    config::{AppConfig, CONFIG_PATH_ENV},
    gesture::LoggingGestureHandler,
    model_download::{ModelKind, ensure_model_ready, model_path},
    pipeline::{OrtLandmarkSource, Renderer, start_camera_stream, start_detection_loop},
    session::Session,
    ui::UiRuntime,
};

const UPDATE_QUEUE_DEPTH: usize = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train webcam hand gestures with a k-nearest-neighbor classifier")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,
    /// Camera index, overrides the config.
    #[arg(long)]
    camera: Option<u32>,
    /// Directory holding the ONNX models.
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Neighbors consulted per prediction.
    #[arg(long)]
    k: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    if let Some(index) = cli.camera {
        cfg.camera.index = index;
    }
    if let Some(dir) = cli.model_dir {
        cfg.model_dir = dir;
    }
    if let Some(k) = cli.k {
        cfg.k = k;
    }
    cfg.validate()?;
    log::info!("starting with {cfg:?}");

    for kind in ModelKind::ALL {
        let path = model_path(&cfg.model_dir, kind);
        ensure_model_ready(kind, &path, |event| log::debug!("model event: {event:?}"))
            .with_context(|| format!("failed to prepare {} model", kind.label()))?;
    }

    let source = OrtLandmarkSource::new(
        &model_path(&cfg.model_dir, ModelKind::HandposeEstimator),
        &model_path(&cfg.model_dir, ModelKind::PalmDetector),
        &cfg.detection,
    )?;
    let classifier = KnnClassifier::new(cfg.k)?;
    log::info!("classifier ready, k = {}", classifier.k());
    let session = Session::new(
        source,
        classifier,
        Renderer::new(cfg.camera.mirror),
        LoggingGestureHandler,
    );

    let (frame_tx, frame_rx) = bounded(1);
    let (command_tx, command_rx) = unbounded();
    let (update_tx, update_rx) = bounded(UPDATE_QUEUE_DEPTH);

    let camera_stream = match start_camera_stream(&cfg.camera, frame_tx) {
        Ok(stream) => stream,
        Err(err) => {
            log::error!("{err:?}");
            return Err(err);
        }
    };
    log::info!("capturing from {}", camera_stream.device());

    let detection_loop = start_detection_loop(session, frame_rx, command_rx, update_tx)?;

    let runtime = UiRuntime {
        update_rx,
        command_tx,
        detection_loop,
        camera_stream,
    };

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, runtime) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
