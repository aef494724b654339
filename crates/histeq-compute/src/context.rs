//! Device context configuration and device discovery.

use std::fmt;

use crate::backend::{Backend, HostBackend};
use crate::{ComputeError, ComputeResult};

/// Kind of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Accelerator,
    Other,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
            Self::Accelerator => "accelerator",
            Self::Other => "other",
        })
    }
}

/// Properties of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub kind: DeviceKind,
    /// Global memory in bytes.
    pub global_mem_bytes: u64,
    /// Largest work-group the device accepts; bounds the bucket count the
    /// single-group scan can handle.
    pub max_work_group_size: usize,
}

/// One platform and its devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<DeviceInfo>,
}

/// Zero-based platform and device indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub platform: usize,
    pub device: usize,
}

impl DeviceSelection {
    pub fn new(platform: usize, device: usize) -> Self {
        Self { platform, device }
    }

    /// Resolve against a platform list.
    ///
    /// Out-of-range indices fail with the counts that were available.
    pub fn resolve<'a>(
        &self,
        platforms: &'a [PlatformInfo],
    ) -> ComputeResult<(&'a PlatformInfo, &'a DeviceInfo)> {
        let platform = platforms.get(self.platform).ok_or_else(|| ComputeError::DeviceSelection {
            platform: self.platform,
            device: self.device,
            reason: format!("only {} platform(s) available", platforms.len()),
        })?;
        let device = platform.devices.get(self.device).ok_or_else(|| ComputeError::DeviceSelection {
            platform: self.platform,
            device: self.device,
            reason: format!(
                "platform '{}' has only {} device(s)",
                platform.name,
                platform.devices.len()
            ),
        })?;
        Ok((platform, device))
    }
}

/// How to open a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    pub backend: Backend,
    pub selection: DeviceSelection,
    /// Create the queue with profiling enabled.
    pub profiling: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            selection: DeviceSelection::default(),
            profiling: true,
        }
    }
}

impl ContextConfig {
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_device(mut self, platform: usize, device: usize) -> Self {
        self.selection = DeviceSelection::new(platform, device);
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }
}

/// Every platform and device a backend can see.
pub fn list_devices(backend: Backend) -> ComputeResult<Vec<PlatformInfo>> {
    match backend {
        Backend::Auto => list_devices(crate::select_best_backend()),
        Backend::Host => Ok(HostBackend::platforms()),
        Backend::OpenCl => {
            #[cfg(feature = "opencl")]
            {
                crate::backend::OpenClBackend::platforms()
            }
            #[cfg(not(feature = "opencl"))]
            {
                Err(ComputeError::BackendNotAvailable(
                    "opencl feature not enabled".to_string(),
                ))
            }
        }
    }
}

/// Human-readable listing, one block per platform.
///
/// ```text
/// Platform 0: Host (histeq, host-1.0)
///   Device 0: Host CPU (rayon, 8 threads) [CPU, 15.6 GiB, max work-group 16777216]
/// ```
pub fn format_device_listing(platforms: &[PlatformInfo]) -> String {
    let mut out = String::new();
    if platforms.is_empty() {
        out.push_str("No platforms found\n");
    }
    for (p, platform) in platforms.iter().enumerate() {
        out.push_str(&format!(
            "Platform {}: {} ({}, {})\n",
            p, platform.name, platform.vendor, platform.version
        ));
        if platform.devices.is_empty() {
            out.push_str("  No devices\n");
        }
        for (d, dev) in platform.devices.iter().enumerate() {
            out.push_str(&format!(
                "  Device {}: {} [{}, {:.1} GiB, max work-group {}]\n",
                d,
                dev.name,
                dev.kind,
                dev.global_mem_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
                dev.max_work_group_size
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platforms() -> Vec<PlatformInfo> {
        vec![PlatformInfo {
            name: "Test".into(),
            vendor: "acme".into(),
            version: "1.2".into(),
            devices: vec![DeviceInfo {
                name: "Widget".into(),
                vendor: "acme".into(),
                kind: DeviceKind::Gpu,
                global_mem_bytes: 2 * 1024 * 1024 * 1024,
                max_work_group_size: 256,
            }],
        }]
    }

    #[test]
    fn test_resolve_in_range() {
        let list = platforms();
        let (p, d) = DeviceSelection::new(0, 0).resolve(&list).unwrap();
        assert_eq!(p.name, "Test");
        assert_eq!(d.name, "Widget");
    }

    #[test]
    fn test_resolve_out_of_range_names_counts() {
        let list = platforms();
        let err = DeviceSelection::new(0, 3).resolve(&list).unwrap_err();
        assert!(err.to_string().contains("only 1 device(s)"));
        let err = DeviceSelection::new(2, 0).resolve(&list).unwrap_err();
        assert!(matches!(err, ComputeError::DeviceSelection { platform: 2, .. }));
    }

    #[test]
    fn test_listing_format() {
        let text = format_device_listing(&platforms());
        assert!(text.contains("Platform 0: Test (acme, 1.2)"));
        assert!(text.contains("Device 0: Widget [GPU, 2.0 GiB, max work-group 256]"));
        assert_eq!(format_device_listing(&[]), "No platforms found\n");
    }

    #[test]
    fn test_host_listing_has_one_device() {
        let list = list_devices(Backend::Host).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].devices.len(), 1);
    }
}
