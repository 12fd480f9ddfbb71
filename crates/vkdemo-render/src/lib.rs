// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vkdemo_core::Logger;

mod frame_loop;

pub use frame_loop::{drive_frames, EventSource, FrameStats, WindowEvents};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub app_name: String,
    /// Request validation layers and the driver debug callback when available.
    pub validation: bool,
    pub clear_color: [f32; 4],
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            app_name: "vkdemo".to_owned(),
            validation: false,
            clear_color: [0.02, 0.02, 0.04, 1.0],
        }
    }
}

/// Result of one `render` call. Only `Presented` reached the screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// The presentable chain went stale; it has been rebuilt for the next frame.
    Skipped,
    /// The drawable area is empty, nothing was submitted.
    Paused,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RendererOptions,
        logger: &Logger,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
