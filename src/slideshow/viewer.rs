//! Windowed crossfade slideshow on winit + softbuffer.
//!
//! The timeline advances only when its deadline passes; redraw requests from
//! the compositor just re-present the last composed frame. The exit key is
//! honoured on every frame and during the dwell.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use softbuffer::{Context as SoftContext, Surface};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowId};

use crate::config::SlideshowConfig;
use crate::error::SlideshowError;
use crate::processing::compose::{Frame, blend_into};
use crate::scan::LocalImageSet;
use crate::slideshow::loader::{FrameSpec, load_frame, load_frames};
use crate::slideshow::timeline::{Step, Timeline};

type WindowHandle = Arc<Window>;

/// Run the slideshow until the window closes or the exit key is pressed.
///
/// # Errors
/// [`SlideshowError::EmptyImageSet`] if `images` is empty or nothing in it
/// decodes; window/event-loop errors otherwise.
pub fn run(images: &LocalImageSet, cfg: &SlideshowConfig) -> Result<(), SlideshowError> {
    if images.is_empty() {
        return Err(SlideshowError::EmptyImageSet);
    }
    let spec = FrameSpec {
        width: cfg.width,
        height: cfg.height,
        scaling: cfg.scaling,
        background: cfg.background,
    };
    let (paths, frames): (Vec<PathBuf>, Vec<Frame>) = load_frames(images.paths(), &spec)
        .into_iter()
        .map(|loaded| (loaded.path, loaded.frame))
        .unzip();
    let timeline = Timeline::new(frames.len(), cfg.transition_steps, cfg.dwell)?;
    info!(
        count = frames.len(),
        width = cfg.width,
        height = cfg.height,
        scaling = ?cfg.scaling,
        "starting slideshow"
    );

    let event_loop = EventLoop::new()?;
    let mut app = SlideshowApp::new(paths, frames, spec, timeline, cfg.clone());
    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct SlideshowApp {
    cfg: SlideshowConfig,
    /// Source files, re-decoded only when the surface size changes.
    paths: Vec<PathBuf>,
    frames: Vec<Frame>,
    spec: FrameSpec,
    canvas: Vec<u32>,
    timeline: Timeline,
    last_step: Option<Step>,
    deadline: Instant,

    window: Option<WindowHandle>,
    context: Option<SoftContext<WindowHandle>>,
    surface: Option<Surface<WindowHandle, WindowHandle>>,
    failure: Option<SlideshowError>,
}

impl SlideshowApp {
    fn new(
        paths: Vec<PathBuf>,
        frames: Vec<Frame>,
        spec: FrameSpec,
        timeline: Timeline,
        cfg: SlideshowConfig,
    ) -> Self {
        let canvas = vec![0; (spec.width as usize) * (spec.height as usize)];
        Self {
            cfg,
            paths,
            frames,
            spec,
            canvas,
            timeline,
            last_step: None,
            deadline: Instant::now(),
            window: None,
            context: None,
            surface: None,
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: SlideshowError) {
        error!(error = %err, "slideshow stopped");
        self.failure = Some(err);
        event_loop.exit();
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<(), SlideshowError> {
        if self.window.is_some() {
            return Ok(());
        }
        let mut attrs = Window::default_attributes()
            .with_title("picker-frame")
            .with_inner_size(PhysicalSize::new(self.cfg.width, self.cfg.height))
            .with_resizable(false);
        if self.cfg.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = event_loop
            .create_window(attrs)
            .map_err(|err| SlideshowError::Window(err.to_string()))?;
        if self.cfg.fullscreen {
            window.set_cursor_visible(false);
        }
        let window = WindowHandle::new(window);
        let context = SoftContext::new(window.clone())
            .map_err(|err| SlideshowError::Window(err.to_string()))?;
        let surface = Surface::new(&context, window.clone())
            .map_err(|err| SlideshowError::Window(err.to_string()))?;

        self.context = Some(context);
        self.surface = Some(surface);
        let size = window.inner_size();
        self.window = Some(window);
        self.handle_resize(size)?;
        self.deadline = Instant::now();
        Ok(())
    }

    /// Resize the surface and re-scale every frame when the size changed.
    fn handle_resize(&mut self, size: PhysicalSize<u32>) -> Result<(), SlideshowError> {
        let width = size.width.max(1);
        let height = size.height.max(1);
        if let Some(surface) = self.surface.as_mut()
            && let (Some(w), Some(h)) = (NonZeroU32::new(width), NonZeroU32::new(height))
        {
            surface
                .resize(w, h)
                .map_err(|err| SlideshowError::Window(err.to_string()))?;
        }
        if (self.spec.width, self.spec.height) != (width, height) {
            debug!(width, height, "re-preparing frames for surface");
            let spec = self.spec.with_size(width, height);
            self.frames = self
                .paths
                .iter()
                .map(|path| {
                    load_frame(path, &spec).unwrap_or_else(|err| {
                        warn!(path = %path.display(), error = %err, "image no longer decodes; showing background");
                        spec.blank()
                    })
                })
                .collect();
            self.spec = spec;
            self.canvas = vec![0; (width as usize) * (height as usize)];
            if let Some(step) = self.last_step {
                self.compose(step);
            }
        }
        self.request_redraw();
        Ok(())
    }

    fn compose(&mut self, step: Step) {
        match step {
            Step::Hold { index, .. } => {
                self.canvas.copy_from_slice(&self.frames[index].pixels);
            }
            Step::Blend { from, to, t } => {
                blend_into(
                    &mut self.canvas,
                    &self.frames[from].pixels,
                    &self.frames[to].pixels,
                    t,
                );
            }
        }
    }

    /// Advance the timeline by one frame and schedule the next deadline.
    fn tick(&mut self, now: Instant) {
        let step = self.timeline.advance();
        let wait = match step {
            Step::Hold { index, duration } => {
                if let Some(path) = self.paths.get(index) {
                    debug!(index, path = %path.display(), "showing image");
                }
                duration
            }
            Step::Blend { .. } => self.cfg.frame_interval,
        };
        self.compose(step);
        self.last_step = Some(step);
        self.deadline = now + wait.max(Duration::from_millis(1));
        self.request_redraw();
    }

    fn request_redraw(&self) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn present(&mut self) -> Result<(), SlideshowError> {
        let Some(surface) = self.surface.as_mut() else {
            return Ok(());
        };
        let mut buffer = surface
            .buffer_mut()
            .map_err(|err| SlideshowError::Window(err.to_string()))?;
        if buffer.len() == self.canvas.len() {
            buffer.copy_from_slice(&self.canvas);
        }
        buffer
            .present()
            .map_err(|err| SlideshowError::Window(err.to_string()))
    }

    fn is_exit_key(&self, event: &KeyEvent) -> bool {
        if event.state != ElementState::Pressed {
            return false;
        }
        match &event.logical_key {
            Key::Named(NamedKey::Escape) => true,
            Key::Character(text) => {
                let mut buf = [0u8; 4];
                let exit = self.cfg.exit_key.encode_utf8(&mut buf);
                text.eq_ignore_ascii_case(exit)
            }
            _ => false,
        }
    }
}

impl ApplicationHandler for SlideshowApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.ensure_window(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                info!("window closed; leaving slideshow");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } if self.is_exit_key(&event) => {
                info!("exit key pressed; leaving slideshow");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = self.handle_resize(size) {
                    self.fail(event_loop, err);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.present() {
                    self.fail(event_loop, err);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() || self.frames.is_empty() {
            return;
        }
        let now = Instant::now();
        if now >= self.deadline {
            self.tick(now);
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.deadline));
    }
}
