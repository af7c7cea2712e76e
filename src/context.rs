//! Explicitly owned compute devices for model building and training.

use std::fmt;

use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gpu_layers::Conv2DGPU;

/// Where a model replica runs its convolutions
#[derive(Debug)]
pub enum ComputeDevice {
    Cpu,
    Gpu(GpuDevice),
}

#[derive(Debug)]
pub struct GpuDevice {
    pub name: String,
    pub backend: wgpu::Backend,
    pub conv: Conv2DGPU,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "cpu"),
            ComputeDevice::Gpu(gpu) => write!(f, "{} ({:?})", gpu.name, gpu.backend),
        }
    }
}

/// The devices a run trains on.
///
/// Holds one device per model replica. GPU devices are released when the
/// context is dropped, so a context acquired at the start of a run is
/// disposed of on every exit path.
#[derive(Debug)]
pub struct TrainingContext {
    devices: Vec<ComputeDevice>,
}

impl TrainingContext {
    pub fn cpu() -> Self {
        TrainingContext {
            devices: vec![ComputeDevice::Cpu],
        }
    }

    /// Several CPU-bound replicas, trained side by side on the rayon pool
    pub fn cpu_replicas(replicas: usize) -> Self {
        TrainingContext {
            devices: (0..replicas.max(1)).map(|_| ComputeDevice::Cpu).collect(),
        }
    }

    pub fn acquire(config: &Config) -> Result<Self> {
        if !config.use_gpu {
            info!("training on the cpu");
            return Ok(Self::cpu());
        }

        let instance = wgpu::Instance::default();
        let adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .filter(|adapter| adapter.get_info().device_type != wgpu::DeviceType::Cpu)
            .collect();

        if adapters.len() < config.nb_gpus {
            return Err(Error::Device(format!(
                "{} GPUs requested but only {} available",
                config.nb_gpus,
                adapters.len()
            )));
        }

        let mut devices = Vec::with_capacity(config.nb_gpus);
        for (i, adapter) in adapters.iter().take(config.nb_gpus).enumerate() {
            let adapter_info = adapter.get_info();
            let conv = Conv2DGPU::new(adapter, &format!("gpu:{i}"))?;
            info!(device = i, name = %adapter_info.name, backend = ?adapter_info.backend, "acquired gpu");
            devices.push(ComputeDevice::Gpu(GpuDevice {
                name: adapter_info.name,
                backend: adapter_info.backend,
                conv,
            }));
        }

        Ok(TrainingContext { devices })
    }

    /// Runs `f` with a freshly acquired context and releases it afterwards
    pub fn scoped<T>(config: &Config, f: impl FnOnce(&TrainingContext) -> Result<T>) -> Result<T> {
        let ctx = Self::acquire(config)?;
        f(&ctx)
    }

    pub fn devices(&self) -> &[ComputeDevice] {
        &self.devices
    }

    /// Number of model replicas trained side by side
    pub fn replicas(&self) -> usize {
        self.devices.len()
    }

    /// Releases the devices now instead of at the end of the scope
    pub fn release(self) {}
}

impl Drop for TrainingContext {
    fn drop(&mut self) {
        for device in self.devices.drain(..) {
            if let ComputeDevice::Gpu(gpu) = device {
                gpu.conv.destroy();
                info!(name = %gpu.name, "released gpu");
            }
        }
    }
}
