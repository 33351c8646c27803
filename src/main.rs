//! Filter Player - Main Entry Point
//!
//! Opens a video file and plays it through the configured filter chain,
//! either into a window paced by the display or headless into a frame log.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::Context as _;
use clap::Parser;
use filter_player::graph::{build_chain, FilterGpu, FilterRegistry, FrameConsumer, FrameRecorder, OperatorGraph};
use filter_player::playback::{logging_sink, PlayerControl, PlayerState};
use filter_player::render::{gpu_texture_cache, ConversionBackend, SharedSurface, SurfacePresenter, VideoInput, YuvConverter};
use filter_player::settings::{BackendChoice, PlayerSettings};
use filter_player::telemetry::{init_logging, LogConfig};
use filter_player::video::{HostTime, TickDecision, TickScheduler};
use filter_player::{GpuContext, PlaybackSession, PlayerError, ThreadedDecoder, WindowGpuContext};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Filter Player";

/// Frames kept by the headless recorder for the final report
const HEADLESS_LOG_LIMIT: usize = 1_024;

#[derive(Parser, Debug)]
#[command(name = "filter-player", version, about = "Play a video through a GPU filter chain")]
struct Cli {
    /// Video file to play.
    file: PathBuf,

    /// Settings file (defaults to the user config directory).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Run without a window and report delivered frames.
    #[arg(long, default_value_t = false)]
    headless: bool,

    /// Stop after this many frames (headless only).
    #[arg(long)]
    frames: Option<u64>,

    /// Convert and filter on the CPU.
    #[arg(long, default_value_t = false)]
    cpu: bool,

    /// Loop at the end of the file.
    #[arg(long = "loop", default_value_t = false)]
    looping: bool,

    /// Let the display refresh pace ticks.
    #[arg(long, default_value_t = false)]
    vsync: bool,

    /// Tick rate when not synced to the display.
    #[arg(long)]
    fps: Option<u32>,

    /// Log filter, e.g. "debug" or "filter_player=trace".
    #[arg(long)]
    log_level: Option<String>,

    /// Also write logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    /// Command line flags win over the settings file
    fn apply_overrides(&self, settings: &mut PlayerSettings) {
        if self.cpu {
            settings.backend = BackendChoice::Cpu;
        }
        if self.looping {
            settings.looping = true;
        }
        if self.vsync {
            settings.vsync_enabled = true;
        }
        if let Some(fps) = self.fps {
            settings.target_fps = fps;
        }
        settings.sanitize();
    }
}

/// Build the operator graph and conversion backend for a session
///
/// GPU conversion is used when a context is available and the settings ask
/// for it; filters then run on textures too.
fn build_input(
    settings: &PlayerSettings,
    gpu: Option<Arc<GpuContext>>,
    sinks: Vec<Box<dyn FrameConsumer>>,
) -> Result<VideoInput, PlayerError> {
    let registry = FilterRegistry::with_builtins();
    tracing::debug!("Available filters: {}", registry.filter_types().join(", "));
    let mut graph = OperatorGraph::new();
    let source = graph.add_source();
    let matrix = *settings.color_standard.matrix();

    let (backend, filter_gpu) = match gpu {
        Some(gpu) if settings.backend == BackendChoice::Gpu => {
            let cache = gpu_texture_cache(Arc::clone(&gpu), settings.max_idle_per_key);
            let converter = YuvConverter::new(Arc::clone(&gpu), cache.clone(), matrix);
            (ConversionBackend::Gpu(converter), Some(FilterGpu { gpu, cache }))
        }
        _ => (ConversionBackend::Cpu(matrix), None),
    };

    let chain = build_chain(&mut graph, source, &registry, &settings.filters, sinks, filter_gpu.as_ref())?;
    tracing::info!(
        "Pipeline: {} conversion, {} filter(s), {} sink(s)",
        backend.name(),
        chain.filters.len(),
        chain.sinks.len()
    );
    Ok(VideoInput::new(graph, source, backend))
}

/// Open the decoder and apply the initial playback settings
fn start_session(
    cli: &Cli,
    settings: &PlayerSettings,
    input: VideoInput,
) -> Result<PlaybackSession<ThreadedDecoder>, PlayerError> {
    let decoder = ThreadedDecoder::open(&cli.file, settings.frame_queue_depth)?;
    let mut session = PlaybackSession::new(decoder, input, logging_sink());
    session.set_is_looping(settings.looping);
    session.set_volume(settings.volume);
    if (settings.playback_rate - 1.0).abs() > f64::EPSILON {
        if let Err(e) = session.set_playback_speed(settings.playback_rate) {
            tracing::warn!("Keeping normal speed: {}", e);
        }
    }
    session.play();
    Ok(session)
}

// ═══════════════════════════════════════════════════════════════════════════════
// WINDOWED PLAYBACK
// ═══════════════════════════════════════════════════════════════════════════════

enum AppState {
    Uninitialized,
    Running {
        window: Arc<Window>,
        gpu: Arc<GpuContext>,
        surface: SharedSurface,
        session: PlaybackSession<ThreadedDecoder>,
    },
    Exited,
}

struct PlayerApp {
    cli: Cli,
    settings: PlayerSettings,
    state: AppState,
    scheduler: TickScheduler,
}

impl PlayerApp {
    fn new(cli: Cli, settings: PlayerSettings) -> Self {
        let scheduler = TickScheduler::new(settings.target_fps, Instant::now());
        Self {
            cli,
            settings,
            state: AppState::Uninitialized,
            scheduler,
        }
    }

    fn start(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState> {
        let window_attributes = WindowAttributes::default()
            .with_title(format!("{} - {}", WINDOW_TITLE, self.cli.file.display()))
            .with_inner_size(LogicalSize::new(self.settings.window_width, self.settings.window_height));
        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );
        tracing::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        let (gpu, surface) = pollster::block_on(GpuContext::new(Arc::clone(&window)))?;
        let gpu = Arc::new(gpu);
        let surface: SharedSurface = Arc::new(Mutex::new(WindowGpuContext::new(
            &gpu,
            surface,
            window.inner_size(),
            self.settings.vsync_enabled,
        )));

        let presenter = SurfacePresenter::new(Arc::clone(&gpu), Arc::clone(&surface));
        let sinks: Vec<Box<dyn FrameConsumer>> = vec![Box::new(presenter)];
        let input = build_input(&self.settings, Some(Arc::clone(&gpu)), sinks)?;
        let session = start_session(&self.cli, &self.settings, input)?;

        tracing::info!("Filter Player ready. Space toggles pause, ESC exits");
        Ok(AppState::Running {
            window,
            gpu,
            surface,
            session,
        })
    }
}

impl ApplicationHandler for PlayerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !matches!(self.state, AppState::Uninitialized) {
            return;
        }
        match self.start(event_loop) {
            Ok(state) => self.state = state,
            Err(e) => {
                tracing::error!("Failed to start playback: {:#}", e);
                self.state = AppState::Exited;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let AppState::Running {
            window,
            gpu,
            surface,
            session,
        } = &mut self.state
        else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                session.close();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                surface
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .resize(gpu, size);
                window.request_redraw();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::Escape => {
                    session.close();
                    event_loop.exit();
                }
                KeyCode::Space => match session.state() {
                    PlayerState::Playing => session.pause(),
                    PlayerState::Ready | PlayerState::Paused => session.play(),
                    _ => {}
                },
                _ => {}
            },
            WindowEvent::RedrawRequested => {
                session.on_display_tick(HostTime::now());
                if session.is_closed() {
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, .. } = &self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // VSYNC mode: Fifo presentation blocks, so the display paces ticks
        if self.settings.vsync_enabled {
            window.request_redraw();
            event_loop.set_control_flow(ControlFlow::Poll);
            return;
        }

        match self.scheduler.poll(Instant::now()) {
            TickDecision::Tick => {
                window.request_redraw();
                let wake_at = Instant::now() + self.scheduler.interval();
                event_loop.set_control_flow(ControlFlow::WaitUntil(wake_at));
            }
            TickDecision::WaitUntil(wake_at) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(wake_at));
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEADLESS PLAYBACK
// ═══════════════════════════════════════════════════════════════════════════════

fn run_headless(cli: &Cli, settings: &PlayerSettings) -> anyhow::Result<()> {
    let gpu = if settings.backend == BackendChoice::Gpu {
        match pollster::block_on(GpuContext::new_headless()) {
            Ok(gpu) => Some(Arc::new(gpu)),
            Err(e) => {
                tracing::warn!("No GPU available, converting on the CPU: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (recorder, frames) = FrameRecorder::new("headless");
    let sinks: Vec<Box<dyn FrameConsumer>> = vec![Box::new(recorder.with_limit(HEADLESS_LOG_LIMIT))];
    let input = build_input(settings, gpu, sinks)?;
    let mut session = start_session(cli, settings, input)?;

    let mut scheduler = TickScheduler::new(settings.target_fps, Instant::now());
    let started = Instant::now();
    loop {
        if session.is_closed() {
            break;
        }
        if cli.frames.is_some_and(|limit| session.frames_delivered() >= limit) {
            break;
        }
        let duration = session.duration();
        if !settings.looping && duration > 0 && session.position() >= duration {
            tracing::info!("Reached end of file");
            break;
        }

        match scheduler.poll(Instant::now()) {
            TickDecision::Tick => {
                session.on_display_tick(HostTime::now());
            }
            TickDecision::WaitUntil(wake_at) => {
                std::thread::sleep(wake_at.saturating_duration_since(Instant::now()));
            }
        }
    }

    let stats = session.stats();
    let delivered = session.frames_delivered();
    session.close();

    let frames = frames.lock().unwrap_or_else(PoisonError::into_inner);
    let span = match (frames.first(), frames.last()) {
        (Some(first), Some(last)) => format!("{} ms .. {} ms", first.millis, last.millis),
        _ => "none".to_string(),
    };
    tracing::info!(
        frames = delivered,
        elapsed_s = started.elapsed().as_secs_f64(),
        avg_tick_ms = stats.avg_ms,
        p95_tick_ms = stats.p95_ms,
        "Headless run finished, timestamps {}",
        span
    );
    if let Some(last) = frames.last() {
        tracing::info!("Output size {} (display {})", last.size, last.display_size);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        file_path: cli.log_file.clone(),
        level_override: cli.log_level.clone(),
        ..LogConfig::default()
    };
    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("Filter Player v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = PlayerSettings::load(cli.settings.as_deref()).context("Failed to load settings")?;
    cli.apply_overrides(&mut settings);
    tracing::info!(
        "Backend: {:?}, color: {:?}, target FPS: {}",
        settings.backend,
        settings.color_standard,
        settings.target_fps
    );

    if cli.headless {
        return run_headless(&cli, &settings);
    }

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    // Default to sleeping; ticks are scheduled in `about_to_wait`
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = PlayerApp::new(cli, settings);
    event_loop.run_app(&mut app).context("Event loop error")?;
    Ok(())
}
