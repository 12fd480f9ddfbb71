// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use raw_window_handle::HandleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// A native constructor failed during startup or chain recreation.
    #[error("{op} failed: {code}")]
    Setup { op: &'static str, code: vk::Result },

    #[error("surface cannot back a presentable chain: {0}")]
    SurfaceUnsupported(String),

    #[error("no suitable physical device: {0}")]
    DeviceSelection(String),

    #[error("invalid queue plan: {0}")]
    QueuePlan(String),

    /// A per-frame call returned something other than success or a stale-chain code.
    #[error("{op} failed: {code}")]
    Gpu { op: &'static str, code: vk::Result },

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] HandleError),
}

impl RenderError {
    pub fn is_setup(&self) -> bool {
        !matches!(self, RenderError::Gpu { .. })
    }

    /// Native status code, when the failure came from a Vulkan call.
    pub fn code(&self) -> Option<vk::Result> {
        match self {
            RenderError::Setup { code, .. } | RenderError::Gpu { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

/// Labels a raw `VkResult` with the call that produced it.
pub(crate) trait VkResultExt<T> {
    fn setup(self, op: &'static str) -> Result<T>;
    fn gpu(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn setup(self, op: &'static str) -> Result<T> {
        self.map_err(|code| RenderError::Setup { op, code })
    }

    fn gpu(self, op: &'static str) -> Result<T> {
        self.map_err(|code| RenderError::Gpu { op, code })
    }
}
