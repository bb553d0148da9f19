//! ptz_seek - autonomous PTZ scan-and-seek
//!
//! Sweeps the camera through `--iterations` full turns. At each stop it
//! detects the configured objects; a hit is centered, zoomed and captured,
//! then published (MQTT or log) and optionally kept on disk.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ptz_seek::config::parse_delay_secs;
use ptz_seek::{
    camera, create_backend, publish, BackendOptions, CaptureSession, RoundScheduler, RunState,
    ScanConfig, SimWorld, SystemClock,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Scan with a PTZ camera, center and zoom on detected objects, capture them"
)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "PTZ_SEEK_CONFIG")]
    config: Option<PathBuf>,

    /// Number of full sweeps.
    #[arg(long = "iterations", visible_alias = "it")]
    iterations: Option<u32>,

    /// Objects to look for, separated by ';' ("*" for anything).
    #[arg(long = "objects", visible_alias = "obj")]
    objects: Option<String>,

    /// Pan step between sweep positions, in degrees.
    #[arg(long = "panstep", visible_alias = "ps")]
    pan_step: Option<f64>,

    /// Sweep tilt in degrees.
    #[arg(long = "tilt", visible_alias = "tv", allow_negative_numbers = true)]
    tilt: Option<f64>,

    /// Sweep zoom level.
    #[arg(long = "zoom", visible_alias = "zm")]
    zoom: Option<f64>,

    /// Detection model (yolov8n..yolo11x, Florence-base, Florence-large, sim).
    #[arg(long = "model", visible_alias = "m")]
    model: Option<String>,

    /// Minimum seconds between round starts (fractions allowed).
    #[arg(long = "iterdelay", visible_alias = "id", value_parser = parse_delay_secs)]
    iter_delay: Option<Duration>,

    /// Detection confidence threshold.
    #[arg(long = "confidence", visible_alias = "conf")]
    confidence: Option<f32>,

    /// Keep captured images and metadata on disk.
    #[arg(long)]
    keep_images: bool,

    /// Directory for kept images.
    #[arg(long)]
    keep_dir: Option<PathBuf>,

    /// Also publish the wide "before" frame of each candidate.
    #[arg(long)]
    publish_before: bool,

    /// Camera URL (stub://... or http(s)://...).
    #[arg(long)]
    camera_url: Option<String>,

    /// Inference service URL for open-vocabulary models.
    #[arg(long)]
    inference_url: Option<String>,

    /// MQTT broker (host:port, mqtt:// or mqtts://).
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// Scene description prepended to open-vocabulary prompts.
    #[arg(long)]
    prompt_context: Option<String>,

    /// Tilt decrease after a round that found nothing.
    #[arg(long)]
    boredom_tilt_step: Option<f64>,

    /// Populate the stub camera with a demo scene when none is configured.
    #[arg(long)]
    demo_scene: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

impl Args {
    fn apply(&self, cfg: &mut ScanConfig) {
        if let Some(v) = self.iterations {
            cfg.iterations = v;
        }
        if let Some(v) = &self.objects {
            cfg.objects = v.clone();
        }
        if let Some(v) = self.pan_step {
            cfg.pan_step = v;
        }
        if let Some(v) = self.tilt {
            cfg.tilt = v;
        }
        if let Some(v) = self.zoom {
            cfg.zoom = v;
        }
        if let Some(v) = &self.model {
            cfg.model = v.clone();
        }
        if let Some(v) = self.iter_delay {
            cfg.iter_delay = v;
        }
        if let Some(v) = self.confidence {
            cfg.confidence = v;
        }
        if self.keep_images {
            cfg.capture.keep_images = true;
        }
        if let Some(v) = &self.keep_dir {
            cfg.capture.keep_dir = v.clone();
        }
        if self.publish_before {
            cfg.capture.publish_before = true;
        }
        if let Some(v) = &self.camera_url {
            cfg.camera.url = v.clone();
        }
        if let Some(v) = &self.inference_url {
            cfg.backend.endpoint = Some(v.clone());
        }
        if let Some(v) = &self.mqtt_broker {
            cfg.publish.mqtt_broker = Some(v.clone());
        }
        if let Some(v) = &self.prompt_context {
            cfg.prompt_context = v.clone();
        }
        if let Some(v) = self.boredom_tilt_step {
            cfg.boredom_tilt_step = v;
        }
        if self.demo_scene && cfg.camera.sim_objects.is_empty() {
            cfg.camera.sim_objects = SimWorld::demo().objects;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.debug { "debug" } else { "info" };
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if args.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    if let Some(path) = &args.config {
        std::env::set_var(ptz_seek::config::CONFIG_ENV, path);
    }
    let cfg = {
        let _stage = ui.stage("Load configuration");
        ScanConfig::load_with_overrides(|cfg| args.apply(cfg))?
    };
    log::info!(
        "model={} objects={} pan_step={} tilt={} zoom={} iterations={}",
        cfg.model_spec.name(),
        cfg.objects,
        cfg.pan_step,
        cfg.tilt,
        cfg.zoom,
        cfg.iterations
    );

    let camera = {
        let _stage = ui.stage("Connect camera");
        camera::connect(&cfg.camera).context("camera setup failed")?
    };
    let backend = {
        let _stage = ui.stage("Load detector");
        let options = BackendOptions {
            model_dir: cfg.backend.model_dir.clone(),
            endpoint: cfg.backend.endpoint.clone(),
            prompt_context: cfg.prompt_context.clone(),
            input_size: cfg.backend.input_size,
            sim_world: SimWorld::new(cfg.camera.sim_objects.clone()),
            optics: cfg.camera.optics,
        };
        create_backend(&cfg.model_spec, &options).context("detector setup failed")?
    };
    let sink = {
        let _stage = ui.stage("Connect publisher");
        publish::connect(&cfg.publish).context("publisher setup failed")?
    };
    let session = CaptureSession::new(sink, &cfg.capture, cfg.camera.optics);

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        log::info!("stop requested, finishing the current position");
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut state = RunState::new(cfg.tilt);
    let rounds = cfg.iterations;
    let mut scheduler = RoundScheduler::new(
        cfg,
        camera,
        backend,
        session,
        Arc::new(SystemClock::new()),
    )
    .with_stop_flag(stop);
    if let Some(progress) = ui.scan_progress(rounds) {
        scheduler = scheduler.with_observer(Box::new(progress));
    }

    let stats = scheduler.run(&mut state)?;
    log::info!(
        "summary: rounds={} positions={} converged={} abandoned={} captures={} duplicates={} \
         camera_faults={} inference_errors={}",
        stats.rounds,
        stats.positions,
        stats.seeks_converged,
        stats.seeks_abandoned,
        stats.captures,
        stats.duplicates_skipped,
        stats.camera_faults,
        stats.inference_errors
    );
    for captured in &state.captures {
        println!(
            "{}",
            serde_json::to_string(captured).context("encode capture summary")?
        );
    }
    Ok(())
}
