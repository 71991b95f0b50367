// =============================================================================
// TRIANGLE RENDERER - Vulkan context, swapchain and frame lifecycle
// =============================================================================
//
// Draws a single colored triangle (optionally orbited by a camera and tinted
// by an animated light) while surviving resize, minimize and stale swapchains.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input, FPS title)                           │
// │    └── Renderer (frame loop, the only queue submitter)          │
// │          ├── Swapchain + FramePipeline (rebuilt on resize)      │
// │          ├── FrameSlots (fences, semaphores, command buffers)   │
// │          └── VulkanDevice → Surface → VulkanInstance            │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the slot's previous frame
// 2. Acquire swapchain image
// 3. Wait for whichever frame still uses that image
// 4. Record and submit commands
// 5. Present rendered image to screen
//
// =============================================================================

mod backend;
mod config;
mod scene;

use anyhow::{Context, Result};
use backend::surface::SurfaceProvider;
use backend::{FrameStatus, Renderer, Surface, VulkanDevice, VulkanInstance};
use config::Config;
use raw_window_handle::HasRawDisplayHandle;
use std::fs::File;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::{StartCause, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, source) = Config::load();

    // Initialize logging, then report how the config load went
    init_logging(&config)?;
    log::info!("Starting triangle renderer");
    source.report();
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    // Redraws are requested explicitly; a minimized window just sleeps
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally piped into a file instead of stderr
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    // RUST_LOG still wins over the default level
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// How often a paused app re-checks a window that may have been restored
/// without a Resized event (macOS, some X11 window managers)
const RESTORE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Rendering resumes once the window reports a drawable area again
fn window_restored(deferred: bool, window: &impl SurfaceProvider) -> bool {
    deferred && !window.is_minimized()
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct: window, renderer and the bits of UI state.
///
/// IMPORTANT: Field order matters for Drop! The renderer (and with it the
/// surface) must go before the window it presents to.
struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // RENDERING
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Option<Renderer>,
    /// Nothing to draw until the window gets a drawable area back
    deferred: bool,
    /// Fatal error that ended the event loop
    fatal: Option<anyhow::Error>,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Window>,
    is_fullscreen: bool,
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            renderer: None,
            deferred: false,
            fatal: None,
            window: None,
            is_fullscreen,
            config,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&self, window: &Window) -> Result<Renderer> {
        let instance = VulkanInstance::new(
            &self.config.window.title,
            window.raw_display_handle(),
            self.config.debug.validation_layers,
        )
        .context("Failed to create Vulkan instance")?;

        let surface = Surface::new(instance.clone(), window).context("Failed to create surface")?;
        let device = VulkanDevice::new(instance, &surface).context("Failed to create device")?;

        let renderer = Renderer::new(device, surface, window, self.config.renderer_settings())
            .context("Failed to create renderer")?;
        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.fatal = Some(error);
        event_loop.exit();
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return;
        };

        match renderer.draw_frame(window) {
            Ok(FrameStatus::Presented) => self.update_fps(),
            Ok(FrameStatus::Skipped) => {}
            Ok(FrameStatus::Deferred) => {
                if !self.deferred {
                    log::info!("Window minimized, rendering paused");
                }
                self.deferred = true;
            }
            Err(e) => {
                let error = anyhow::Error::new(e).context("Render error");
                self.fail(event_loop, error);
            }
        }
    }

    /// Leave the paused state if the window came back; true when it did
    fn resume_if_restored(&mut self, event_loop: &ActiveEventLoop) -> bool {
        let Some(window) = self.window.as_ref() else {
            return false;
        };
        if !window_restored(self.deferred, window) {
            return false;
        }

        log::info!("Window restored, rendering resumed");
        self.deferred = false;
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.request_resize();
        }
        window.request_redraw();
        true
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(renderer) = self.renderer.as_mut() {
                renderer.request_resize();
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_vulkan(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        // Restoring may only show up as focus or occlusion changes
        if self.deferred && !matches!(event, WindowEvent::RedrawRequested) {
            self.resume_if_restored(event_loop);
        }

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            // ESC - Quit application
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            // F11 - Toggle fullscreen
                            KeyCode::F11 => self.toggle_fullscreen(),
                            // T - Triangles <-> points, same pipeline
                            KeyCode::KeyT => {
                                if let Some(renderer) = self.renderer.as_mut() {
                                    renderer.toggle_topology();
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Re-check a paused window when the poll timer fires
    fn new_events(&mut self, event_loop: &ActiveEventLoop, cause: StartCause) {
        if self.deferred && matches!(cause, StartCause::ResumeTimeReached { .. }) {
            self.resume_if_restored(event_loop);
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// Keeps frames coming unless the window is minimized.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.deferred {
            // Not every platform sends an event when a window is restored
            event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + RESTORE_POLL_INTERVAL));
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Renderer drop waits for the device before anything is destroyed
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}
