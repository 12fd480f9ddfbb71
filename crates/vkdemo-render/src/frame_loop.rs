// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use vkdemo_core::{Level, Logger};
use vkdemo_platform::{Platform, PlatformEvent, WindowHandle};

use crate::{FrameOutcome, RenderSize, Renderer};

const PAUSED_SLEEP: Duration = Duration::from_millis(16);
const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Event stream plus drawable size query, polled once per loop iteration.
pub trait EventSource {
    fn poll_events(&mut self) -> Vec<PlatformEvent>;
    fn drawable_size(&self) -> RenderSize;
}

pub struct WindowEvents<'a> {
    platform: &'a mut Platform,
    window: &'a WindowHandle,
}

impl<'a> WindowEvents<'a> {
    pub fn new(platform: &'a mut Platform, window: &'a WindowHandle) -> Self {
        Self { platform, window }
    }
}

impl EventSource for WindowEvents<'_> {
    fn poll_events(&mut self) -> Vec<PlatformEvent> {
        self.platform.poll_events()
    }

    fn drawable_size(&self) -> RenderSize {
        let (width, height) = self.window.drawable_size();
        RenderSize { width, height }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub paused: u64,
    pub resizes: u64,
}

/// Runs frames until the event source reports `Quit`.
///
/// Quit is checked once per iteration, before the frame starts. A burst of
/// resize events collapses into one `resize` call with the current drawable
/// size. Any renderer error ends the loop.
pub fn drive_frames<E, R>(events: &mut E, renderer: &mut R, logger: &Logger) -> Result<FrameStats>
where
    E: EventSource,
    R: Renderer,
{
    let mut stats = FrameStats::default();
    let mut frames_in_window: u32 = 0;
    let mut window_start = Instant::now();

    loop {
        let mut resized = false;
        for event in events.poll_events() {
            match event {
                PlatformEvent::Quit => {
                    logger.info(format_args!(
                        "frame loop: quit after {} presented, {} skipped, {} resizes",
                        stats.presented, stats.skipped, stats.resizes
                    ));
                    return Ok(stats);
                }
                PlatformEvent::Resized { .. } => resized = true,
            }
        }

        if resized {
            let size = events.drawable_size();
            if logger.should_log(Level::DEBUG) {
                logger.debug(format_args!("frame loop: resize to {}x{}", size.width, size.height));
            }
            renderer
                .resize(size)
                .with_context(|| format!("resize to {}x{}", size.width, size.height))?;
            stats.resizes += 1;
        }

        match renderer.render().context("render frame")? {
            FrameOutcome::Presented { .. } => {
                stats.presented += 1;
                frames_in_window = frames_in_window.saturating_add(1);
            }
            FrameOutcome::Skipped => stats.skipped += 1,
            FrameOutcome::Paused => {
                stats.paused += 1;
                std::thread::sleep(PAUSED_SLEEP);
            }
        }

        let now = Instant::now();
        if now.duration_since(window_start) >= FPS_WINDOW {
            logger.info(format_args!("fps ~ {frames_in_window}"));
            frames_in_window = 0;
            window_start = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use anyhow::bail;
    use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
    use vkdemo_core::LevelFilter;

    use super::*;
    use crate::RendererOptions;

    struct ScriptedEvents {
        batches: VecDeque<Vec<PlatformEvent>>,
        size: RenderSize,
    }

    impl EventSource for ScriptedEvents {
        fn poll_events(&mut self) -> Vec<PlatformEvent> {
            self.batches
                .pop_front()
                .unwrap_or_else(|| vec![PlatformEvent::Quit])
        }

        fn drawable_size(&self) -> RenderSize {
            self.size
        }
    }

    #[derive(Default)]
    struct ScriptedRenderer {
        outcomes: VecDeque<FrameOutcome>,
        resizes: Vec<RenderSize>,
        renders: u32,
        fail_on_render: Option<u32>,
    }

    impl Renderer for ScriptedRenderer {
        fn new(
            _window: &dyn HasWindowHandle,
            _display: &dyn HasDisplayHandle,
            _size: RenderSize,
            _options: &RendererOptions,
            _logger: &Logger,
        ) -> Result<Self> {
            Ok(Self::default())
        }

        fn resize(&mut self, size: RenderSize) -> Result<()> {
            self.resizes.push(size);
            Ok(())
        }

        fn render(&mut self) -> Result<FrameOutcome> {
            self.renders += 1;
            if self.fail_on_render == Some(self.renders) {
                bail!("device lost");
            }
            Ok(self
                .outcomes
                .pop_front()
                .unwrap_or(FrameOutcome::Presented { image_index: 0 }))
        }

        fn set_clear_color(&mut self, _rgba: [f32; 4]) {}
    }

    fn quiet() -> Logger {
        Logger::new("test", LevelFilter::OFF)
    }

    fn events(batches: Vec<Vec<PlatformEvent>>) -> ScriptedEvents {
        ScriptedEvents {
            batches: batches.into(),
            size: RenderSize {
                width: 640,
                height: 480,
            },
        }
    }

    #[test]
    fn quit_before_first_frame_renders_nothing() {
        let mut ev = events(vec![vec![PlatformEvent::Quit]]);
        let mut r = ScriptedRenderer::default();
        let stats = drive_frames(&mut ev, &mut r, &quiet()).unwrap();
        assert_eq!(stats, FrameStats::default());
        assert_eq!(r.renders, 0);
    }

    #[test]
    fn counts_outcomes_until_quit() {
        let mut ev = events(vec![vec![], vec![], vec![]]);
        let mut r = ScriptedRenderer {
            outcomes: vec![
                FrameOutcome::Presented { image_index: 0 },
                FrameOutcome::Skipped,
                FrameOutcome::Presented { image_index: 1 },
            ]
            .into(),
            ..Default::default()
        };
        let stats = drive_frames(&mut ev, &mut r, &quiet()).unwrap();
        assert_eq!(stats.presented, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(r.renders, 3);
    }

    #[test]
    fn resize_burst_uses_drawable_size_once() {
        let mut ev = events(vec![vec![
            PlatformEvent::Resized {
                width: 10,
                height: 10,
            },
            PlatformEvent::Resized {
                width: 20,
                height: 20,
            },
        ]]);
        let mut r = ScriptedRenderer::default();
        let stats = drive_frames(&mut ev, &mut r, &quiet()).unwrap();
        assert_eq!(stats.resizes, 1);
        assert_eq!(
            r.resizes,
            vec![RenderSize {
                width: 640,
                height: 480
            }]
        );
        assert_eq!(stats.presented, 1);
    }

    #[test]
    fn quit_in_same_batch_as_resize_skips_the_resize() {
        let mut ev = events(vec![vec![
            PlatformEvent::Resized {
                width: 1,
                height: 1,
            },
            PlatformEvent::Quit,
        ]]);
        let mut r = ScriptedRenderer::default();
        drive_frames(&mut ev, &mut r, &quiet()).unwrap();
        assert!(r.resizes.is_empty());
        assert_eq!(r.renders, 0);
    }

    #[test]
    fn paused_frames_are_counted() {
        let mut ev = events(vec![vec![], vec![]]);
        let mut r = ScriptedRenderer {
            outcomes: vec![FrameOutcome::Paused, FrameOutcome::Paused].into(),
            ..Default::default()
        };
        let stats = drive_frames(&mut ev, &mut r, &quiet()).unwrap();
        assert_eq!(stats.paused, 2);
        assert_eq!(stats.presented, 0);
    }

    #[test]
    fn render_error_stops_the_loop() {
        let mut ev = events(vec![vec![], vec![], vec![]]);
        let mut r = ScriptedRenderer {
            fail_on_render: Some(2),
            ..Default::default()
        };
        let err = drive_frames(&mut ev, &mut r, &quiet()).unwrap_err();
        assert!(format!("{err:#}").contains("device lost"));
        assert_eq!(r.renders, 2);
    }
}
