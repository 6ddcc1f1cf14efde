//! streamtex: synthetic camera streamed into a display image

use std::path::PathBuf;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tokio::sync::watch;
use tracing::{debug, error, info};

use streamtex::capture::{CaptureDevice, SyntheticCamera};
use streamtex::inspect::DeviceInspector;
use streamtex::render::{ImageBackend, MemoryBackend, StreamRenderer};
use streamtex::{Config, ImageBackendKind};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamtex=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("streamtex launching...");

    // Load configuration
    let path = std::env::args().nth(1).map(PathBuf::from);
    Config::load(path.as_deref())?.install();
    let config = Config::current();
    debug!(?config, "Configuration loaded");

    let device = CaptureDevice::new();
    let inspector = DeviceInspector::new();
    let _inspector_sub = inspector.attach(&device);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Render thread owns the renderer and its image backend
    let render_device = device.clone();
    let render_shutdown = shutdown_rx.clone();
    let mut render =
        tokio::task::spawn_blocking(move || render_thread(&render_device, render_shutdown));

    // Capture task
    let camera = SyntheticCamera::new(device.clone(), config.capture.clone());
    let capture = tokio::spawn(camera.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    for sensor in inspector.sensor_names() {
        let options = inspector.options(&sensor).unwrap_or_default();
        info!(%sensor, options = options.len(), "Sensor");
        for option in options {
            debug!(%sensor, option = %option.name, value = option.value, "Option");
        }
    }

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
        _ = run_limit(config.display.run_seconds) => None,
        result = &mut render => Some(result),
    };

    let _ = shutdown_tx.send(true);
    capture.await?;
    let result = match finished {
        Some(result) => result,
        None => render.await,
    };
    result??;

    info!("streamtex shutting down");
    Ok(())
}

async fn run_limit(seconds: u64) {
    if seconds == 0 {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

fn render_thread(device: &CaptureDevice, shutdown: watch::Receiver<bool>) -> streamtex::Result<()> {
    match Config::current().display.backend {
        ImageBackendKind::Memory => render_loop(device, shutdown, MemoryBackend::new()),
        #[cfg(feature = "gpu-display")]
        ImageBackendKind::Wgpu => {
            let backend = streamtex::render::WgpuBackend::blocking_new(wgpu::PowerPreference::HighPerformance)?;
            render_loop(device, shutdown, backend)
        }
        #[cfg(not(feature = "gpu-display"))]
        ImageBackendKind::Wgpu => Err(streamtex::Error::Backend(
            "built without the gpu-display feature".into(),
        )),
    }
}

/// Pacing and stats interval are re-read from the installed config on every
/// tick.
fn render_loop<B: ImageBackend>(
    device: &CaptureDevice,
    shutdown: watch::Receiver<bool>,
    backend: B,
) -> streamtex::Result<()> {
    let config = Config::current();
    let mut renderer = StreamRenderer::new(&config.renderer, backend);
    renderer.on_image_bound(|_| debug!("Display image handed to consumers"));
    renderer.attach(device);
    info!(request = ?config.renderer.request(), threading = ?renderer.threading(), "Renderer attached");

    let mut next_tick = Instant::now();
    let mut last_stats = Instant::now();
    let mut uploads = 0u64;

    while !*shutdown.borrow() {
        let report = match renderer.tick() {
            Ok(report) => report,
            Err(err) => {
                error!(%err, "Render tick failed");
                return Err(err);
            }
        };
        uploads += report.uploaded as u64;

        let display = Config::current().display.clone();
        let period = Duration::from_secs_f64(1.0 / display.tick_hz.max(1) as f64);
        let stats_every = Duration::from_secs(display.stats_interval_secs.max(1));

        if last_stats.elapsed() >= stats_every {
            let stats = renderer.synchronizer().stats();
            info!(
                state = ?renderer.state(),
                current = ?renderer.current_request().map(|r| (r.width, r.height)),
                uploads,
                staged = stats.frames_staged,
                overwritten = stats.frames_overwritten,
                request_conflicts = stats.request_conflicts,
                shape_conflicts = stats.shape_conflicts,
                "Renderer stats"
            );
            last_stats = Instant::now();
        }

        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }

    info!(uploads, "Render loop finished");
    Ok(())
}
