// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Window and event collaborator.
//!
//! The event loop is driven by pumping (`pump_app_events`) so the caller keeps
//! its own outer loop: create a window, then call [`Platform::poll_events`]
//! once per iteration. winit allows one event loop per process.

use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{debug, info};

pub use winit;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    raw_window_handle::{self as rwh, HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowAttributes, WindowId},
};

/// How many pump rounds `create_window` waits for the loop to hand out an
/// active event loop.
const CREATE_ROUNDS: u32 = 200;
const CREATE_ROUND_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    Quit,
    Resized { width: u32, height: u32 },
}

pub struct Platform {
    event_loop: EventLoop<()>,
    state: PumpState,
}

#[derive(Default)]
struct PumpState {
    pending: Option<WindowAttributes>,
    created: Option<Result<Rc<Window>>>,
    windows: Vec<WindowId>,
    events: Vec<PlatformEvent>,
}

impl PumpState {
    fn create_pending(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(attrs) = self.pending.take() {
            let res = event_loop
                .create_window(attrs)
                .map(Rc::new)
                .map_err(anyhow::Error::from);
            if let Ok(w) = &res {
                self.windows.push(w.id());
            }
            self.created = Some(res);
        }
    }
}

impl ApplicationHandler for PumpState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        self.create_pending(event_loop);
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if !self.windows.contains(&id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                debug!("platform: close requested");
                self.events.push(PlatformEvent::Quit);
            }
            WindowEvent::Resized(size) => self.events.push(PlatformEvent::Resized {
                width: size.width,
                height: size.height,
            }),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.create_pending(event_loop);
    }
}

impl Platform {
    pub fn new() -> Result<Self> {
        #[allow(unused_mut)]
        let mut builder = EventLoop::builder();
        // Tests run off the main thread.
        #[cfg(target_os = "linux")]
        {
            winit::platform::x11::EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
            winit::platform::wayland::EventLoopBuilderExtWayland::with_any_thread(
                &mut builder,
                true,
            );
        }
        #[cfg(target_os = "windows")]
        winit::platform::windows::EventLoopBuilderExtWindows::with_any_thread(&mut builder, true);

        let event_loop = builder.build()?;
        Ok(Self {
            event_loop,
            state: PumpState::default(),
        })
    }

    /// Opens a resizable window whose drawable area is `width`×`height` pixels.
    pub fn create_window(&mut self, title: &str, width: u32, height: u32) -> Result<WindowHandle> {
        self.state.pending = Some(
            Window::default_attributes()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .with_resizable(true),
        );

        for _ in 0..CREATE_ROUNDS {
            let status = self
                .event_loop
                .pump_app_events(Some(CREATE_ROUND_TIMEOUT), &mut self.state);
            if let Some(created) = self.state.created.take() {
                let window = created?;
                let size = window.inner_size();
                info!(
                    "platform: window \"{title}\" {}x{}",
                    size.width, size.height
                );
                return Ok(WindowHandle { window });
            }
            if let PumpStatus::Exit(code) = status {
                bail!("event loop exited with code {code} before the window was created");
            }
        }
        self.state.pending = None;
        bail!("timed out waiting for the event loop to create window \"{title}\"")
    }

    /// Drains pending OS events without blocking.
    pub fn poll_events(&mut self) -> Vec<PlatformEvent> {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        if let PumpStatus::Exit(_) = status {
            self.state.events.push(PlatformEvent::Quit);
        }
        std::mem::take(&mut self.state.events)
    }
}

/// A created window. Cloning shares the same native window.
#[derive(Clone)]
pub struct WindowHandle {
    window: Rc<Window>,
}

impl WindowHandle {
    pub fn title(&self) -> String {
        self.window.title()
    }

    pub fn drawable_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl HasWindowHandle for WindowHandle {
    fn window_handle(&self) -> Result<rwh::WindowHandle<'_>, rwh::HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for WindowHandle {
    fn display_handle(&self) -> Result<rwh::DisplayHandle<'_>, rwh::HandleError> {
        self.window.display_handle()
    }
}
