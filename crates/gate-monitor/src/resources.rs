//! Host resource sampling

use crate::health::ResourceReadings;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

/// Source of host resource readings for an evaluation pass.
///
/// Sampling is synchronous and must not block for long; it runs inside the
/// evaluation pass between the engine probe and publishing.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceReadings;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_percent: f64,
}

/// Host-level view served next to the engine health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_count: usize,
    pub cpu_percent: f64,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_percent: f64,
    pub load_average: LoadAverage,
    pub disks: Vec<DiskUsage>,
    #[serde(flatten)]
    pub accelerator: ResourceReadings,
    pub timestamp: DateTime<Utc>,
}

/// Host memory via `sysinfo`, plus accelerator memory, temperature and
/// utilisation through NVML when built with the `nvml` feature and a driver
/// is present. Without NVML the accelerator fields come from the engine.
pub struct HostResourceSampler {
    system: Mutex<System>,
    #[cfg(feature = "nvml")]
    nvml: Option<nvml_wrapper::Nvml>,
}

impl HostResourceSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            #[cfg(feature = "nvml")]
            nvml: match nvml_wrapper::Nvml::init() {
                Ok(nvml) => {
                    tracing::info!("NVML initialized, sampling accelerators on the host");
                    Some(nvml)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "NVML unavailable, accelerator readings come from the engine");
                    None
                }
            },
        }
    }

    /// CPU, memory, load and disk usage. CPU usage is measured against the
    /// previous call, so the first reading is 0.
    pub fn system_metrics(&self) -> SystemMetrics {
        let (cpu_count, cpu_percent, memory_total_bytes, memory_used_bytes) = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();
            (
                system.cpus().len(),
                f64::from(system.global_cpu_info().cpu_usage()),
                system.total_memory(),
                system.used_memory(),
            )
        };

        let load = System::load_average();
        let disks = Disks::new_with_refreshed_list()
            .list()
            .iter()
            .map(|disk| DiskUsage {
                mount_point: disk.mount_point().display().to_string(),
                total_bytes: disk.total_space(),
                available_bytes: disk.available_space(),
                used_percent: percent(
                    disk.total_space().saturating_sub(disk.available_space()),
                    disk.total_space(),
                )
                .unwrap_or_default(),
            })
            .collect();

        SystemMetrics {
            cpu_count,
            cpu_percent,
            memory_total_bytes,
            memory_used_bytes,
            memory_percent: percent(memory_used_bytes, memory_total_bytes).unwrap_or_default(),
            load_average: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            disks,
            accelerator: self.accelerator_readings(),
            timestamp: Utc::now(),
        }
    }

    #[cfg(feature = "nvml")]
    fn accelerator_readings(&self) -> ResourceReadings {
        match &self.nvml {
            Some(nvml) => nvml_readings(nvml),
            None => ResourceReadings::default(),
        }
    }

    #[cfg(not(feature = "nvml"))]
    fn accelerator_readings(&self) -> ResourceReadings {
        ResourceReadings::default()
    }
}

impl Default for HostResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for HostResourceSampler {
    fn sample(&self) -> ResourceReadings {
        let memory_percent = {
            let mut system = self.system.lock();
            system.refresh_memory();
            percent(system.used_memory(), system.total_memory())
        };

        ResourceReadings {
            memory_percent,
            ..self.accelerator_readings()
        }
    }
}

fn percent(used: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| used as f64 / total as f64 * 100.0)
}

/// Worst reading across all devices
#[cfg(feature = "nvml")]
fn nvml_readings(nvml: &nvml_wrapper::Nvml) -> ResourceReadings {
    use nvml_wrapper::enum_wrappers::device::TemperatureSensor;

    fn worst(current: Option<f64>, value: Option<f64>) -> Option<f64> {
        match (current, value) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    let mut readings = ResourceReadings::default();
    let count = match nvml.device_count() {
        Ok(count) => count,
        Err(e) => {
            tracing::debug!(error = %e, "NVML device count failed");
            return readings;
        }
    };

    for index in 0..count {
        let Ok(device) = nvml.device_by_index(index) else {
            continue;
        };

        let memory = device
            .memory_info()
            .ok()
            .and_then(|info| percent(info.used, info.total));
        let temperature = device
            .temperature(TemperatureSensor::Gpu)
            .ok()
            .map(f64::from);
        let utilization = device
            .utilization_rates()
            .ok()
            .map(|rates| f64::from(rates.gpu));

        readings.accelerator_memory_percent = worst(readings.accelerator_memory_percent, memory);
        readings.accelerator_temperature = worst(readings.accelerator_temperature, temperature);
        readings.accelerator_utilization = worst(readings.accelerator_utilization, utilization);
    }

    readings
}

/// Fixed readings, for hosts without sampling support and for tests
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResources(pub ResourceReadings);

impl ResourceSampler for StaticResources {
    fn sample(&self) -> ResourceReadings {
        self.0
    }
}
