// SPDX-License-Identifier: CEPL-1.0
//! Physical device filtering and scoring.
//!
//! Probing a device (native queries) is kept apart from choosing one, so the
//! choice can be exercised with synthetic candidates.

use std::collections::BTreeSet;

use ash::vk;
use vkdemo_core::{Level, Logger};

use crate::error::{RenderError, Result};
use crate::instance::{filter_available, PhysicalDevice, Surface};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Presentation support for the surface the candidate was probed against.
    pub presents: bool,
}

/// Everything the selector looks at, captured from one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub extensions: BTreeSet<String>,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
}

impl DeviceCandidate {
    /// Queries `device`; presentation support is asked per queue family when
    /// a surface is given.
    pub fn probe(device: &PhysicalDevice<'_>, surface: Option<&Surface>) -> Result<Self> {
        let props = device.properties();
        let queue_families = device
            .queue_families()
            .iter()
            .enumerate()
            .map(|(i, q)| -> Result<QueueFamilyInfo> {
                let presents = match surface {
                    Some(s) => device.supports_present(i as u32, s)?,
                    None => false,
                };
                Ok(QueueFamilyInfo {
                    flags: q.queue_flags,
                    queue_count: q.queue_count,
                    presents,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: device.name(),
            device_type: props.device_type,
            extensions: device.extension_names()?,
            queue_families,
            memory_types: device.memory_types(),
        })
    }

    fn score(&self) -> u32 {
        u32::from(self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeviceRequirements {
    pub extensions: BTreeSet<String>,
    pub queue_flags: vk::QueueFlags,
    pub memory_flags: vk::MemoryPropertyFlags,
    pub present: bool,
}

/// Returns the first matching queue family, or why the candidate is rejected.
fn evaluate(c: &DeviceCandidate, req: &DeviceRequirements) -> std::result::Result<u32, String> {
    let found = filter_available(&req.extensions, &c.extensions);
    if found.len() < req.extensions.len() {
        let missing: Vec<&String> = req
            .extensions
            .iter()
            .filter(|e| !found.contains(e))
            .collect();
        return Err(format!("missing extensions {missing:?}"));
    }

    let family = c
        .queue_families
        .iter()
        .position(|q| q.flags.contains(req.queue_flags) && (!req.present || q.presents))
        .ok_or_else(|| {
            if req.present {
                format!("no {:?} queue family that can present", req.queue_flags)
            } else {
                format!("no {:?} queue family", req.queue_flags)
            }
        })?;

    if !c.memory_types.iter().any(|m| m.contains(req.memory_flags)) {
        return Err(format!("no memory type with {:?}", req.memory_flags));
    }

    Ok(family as u32)
}

/// Picks the best candidate: discrete GPUs score 1, everything else 0, ties go
/// to enumeration order. Returns `(candidate index, queue family index)`.
pub fn choose_candidate(
    candidates: &[DeviceCandidate],
    req: &DeviceRequirements,
    logger: &Logger,
) -> Result<(usize, u32)> {
    let mut best: Option<(usize, u32, u32)> = None;
    let mut rejections = Vec::new();

    for (i, c) in candidates.iter().enumerate() {
        match evaluate(c, req) {
            Ok(family) => {
                let score = c.score();
                if best.map_or(true, |(_, _, s)| score > s) {
                    best = Some((i, family, score));
                }
            }
            Err(reason) => {
                if logger.should_log(Level::DEBUG) {
                    logger.debug(format_args!("vk: rejecting {}: {reason}", c.name));
                }
                rejections.push(format!("{}: {reason}", c.name));
            }
        }
    }

    match best {
        Some((i, family, _)) => Ok((i, family)),
        None if candidates.is_empty() => Err(RenderError::DeviceSelection(
            "no physical devices enumerated".to_owned(),
        )),
        None => Err(RenderError::DeviceSelection(rejections.join("; "))),
    }
}

/// Probes `devices` against the requirements and returns the chosen device
/// with its first matching queue family.
pub fn select_physical_device<'i>(
    devices: &[PhysicalDevice<'i>],
    extensions: &[&str],
    queue_flags: vk::QueueFlags,
    memory_flags: vk::MemoryPropertyFlags,
    surface: Option<&Surface>,
    logger: &Logger,
) -> Result<(PhysicalDevice<'i>, u32)> {
    let candidates = devices
        .iter()
        .map(|d| DeviceCandidate::probe(d, surface))
        .collect::<Result<Vec<_>>>()?;
    let req = DeviceRequirements {
        extensions: extensions.iter().map(|e| (*e).to_owned()).collect(),
        queue_flags,
        memory_flags,
        present: surface.is_some(),
    };

    let (index, family) = choose_candidate(&candidates, &req, logger)?;
    logger.info(format_args!(
        "vk: selected {} ({:?}), queue family {family}",
        candidates[index].name, candidates[index].device_type
    ));
    Ok((devices[index], family))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkdemo_core::LevelFilter;

    const SWAPCHAIN: &str = "VK_KHR_swapchain";

    fn quiet() -> Logger {
        Logger::new("test", LevelFilter::OFF)
    }

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_owned(),
            device_type,
            extensions: [SWAPCHAIN.to_owned()].into_iter().collect(),
            queue_families: vec![
                QueueFamilyInfo {
                    flags: vk::QueueFlags::TRANSFER,
                    queue_count: 2,
                    presents: false,
                },
                QueueFamilyInfo {
                    flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                    queue_count: 1,
                    presents: true,
                },
            ],
            memory_types: vec![
                vk::MemoryPropertyFlags::HOST_VISIBLE,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ],
        }
    }

    fn requirements() -> DeviceRequirements {
        DeviceRequirements {
            extensions: [SWAPCHAIN.to_owned()].into_iter().collect(),
            queue_flags: vk::QueueFlags::GRAPHICS,
            memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            present: true,
        }
    }

    #[test]
    fn picks_first_matching_family() {
        let c = vec![candidate("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU)];
        assert_eq!(choose_candidate(&c, &requirements(), &quiet()).unwrap(), (0, 1));
    }

    #[test]
    fn prefers_discrete_gpu() {
        let c = vec![
            candidate("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(choose_candidate(&c, &requirements(), &quiet()).unwrap().0, 1);
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let c = vec![
            candidate("cpu", vk::PhysicalDeviceType::CPU),
            candidate("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("dgpu-a", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("dgpu-b", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(choose_candidate(&c[..2], &requirements(), &quiet()).unwrap().0, 0);
        assert_eq!(choose_candidate(&c, &requirements(), &quiet()).unwrap().0, 2);
    }

    #[test]
    fn discrete_gpu_missing_extension_loses() {
        let mut dgpu = candidate("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        dgpu.extensions.clear();
        let c = vec![dgpu, candidate("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU)];
        assert_eq!(choose_candidate(&c, &requirements(), &quiet()).unwrap().0, 1);
    }

    #[test]
    fn rejects_missing_extension() {
        let mut c = candidate("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        c.extensions = ["VK_KHR_other".to_owned()].into_iter().collect();
        let err = choose_candidate(&[c], &requirements(), &quiet()).unwrap_err();
        assert!(matches!(err, RenderError::DeviceSelection(ref m) if m.contains(SWAPCHAIN)));
    }

    #[test]
    fn rejects_without_capable_queue() {
        let mut c = candidate("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        c.queue_families.truncate(1);
        assert!(choose_candidate(&[c], &requirements(), &quiet()).is_err());
    }

    #[test]
    fn presentation_is_checked_per_family() {
        let mut c = candidate("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        c.queue_families[1].presents = false;
        c.queue_families.push(QueueFamilyInfo {
            flags: vk::QueueFlags::GRAPHICS,
            queue_count: 1,
            presents: true,
        });
        assert_eq!(choose_candidate(&[c.clone()], &requirements(), &quiet()).unwrap(), (0, 2));

        c.queue_families[2].presents = false;
        assert!(choose_candidate(&[c.clone()], &requirements(), &quiet()).is_err());

        let headless = DeviceRequirements {
            present: false,
            ..requirements()
        };
        assert_eq!(choose_candidate(&[c], &headless, &quiet()).unwrap(), (0, 1));
    }

    #[test]
    fn rejects_without_memory_type() {
        let mut c = candidate("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        c.memory_types = vec![vk::MemoryPropertyFlags::HOST_VISIBLE];
        assert!(choose_candidate(&[c.clone()], &requirements(), &quiet()).is_err());

        let any_memory = DeviceRequirements {
            memory_flags: vk::MemoryPropertyFlags::empty(),
            ..requirements()
        };
        assert!(choose_candidate(&[c.clone()], &any_memory, &quiet()).is_ok());

        c.memory_types.clear();
        assert!(choose_candidate(&[c], &any_memory, &quiet()).is_err());
    }

    #[test]
    fn empty_list_is_a_selection_failure() {
        let err = choose_candidate(&[], &requirements(), &quiet()).unwrap_err();
        assert!(matches!(err, RenderError::DeviceSelection(_)));
    }
}
