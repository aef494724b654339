//! Which backends this build can run on, and which one `Auto` picks.

use super::{Backend, HostBackend};

/// One compiled-in backend as seen on this machine.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub backend: Backend,
    pub name: &'static str,
    /// At least one device can be opened.
    pub available: bool,
    /// Devices over all platforms.
    pub device_count: usize,
    /// `Auto` takes the available backend with the highest value.
    pub priority: u32,
    pub description: &'static str,
}

/// Probe every compiled-in backend, highest priority first.
pub fn detect_backends() -> Vec<BackendInfo> {
    let host_devices = HostBackend::platforms().iter().map(|p| p.devices.len()).sum();
    let mut found = vec![BackendInfo {
        backend: Backend::Host,
        name: "host",
        available: true,
        device_count: host_devices,
        priority: 10,
        description: "kernels emulated on the CPU with rayon",
    }];

    #[cfg(feature = "opencl")]
    {
        let device_count = super::OpenClBackend::platforms()
            .map(|ps| ps.iter().map(|p| p.devices.len()).sum())
            .unwrap_or(0);
        let available = device_count > 0;
        found.push(BackendInfo {
            backend: Backend::OpenCl,
            name: "opencl",
            available,
            device_count,
            priority: if available { 100 } else { 0 },
            description: "OpenCL platform devices (opencl3)",
        });
    }

    found.sort_by_key(|info| std::cmp::Reverse(info.priority));
    found
}

/// Backend `Auto` resolves to. The host when nothing else is usable.
pub fn select_best_backend() -> Backend {
    detect_backends()
        .into_iter()
        .find(|info| info.available)
        .map_or(Backend::Host, |info| info.backend)
}

/// `[+] host (1 device): kernels emulated on the CPU with rayon`, one line per backend.
pub fn describe_backends() -> String {
    detect_backends()
        .iter()
        .map(|info| {
            let mark = if info.available { '+' } else { '-' };
            let plural = if info.device_count == 1 { "" } else { "s" };
            format!(
                "[{mark}] {} ({} device{plural}): {}\n",
                info.name, info.device_count, info.description
            )
        })
        .collect()
}
