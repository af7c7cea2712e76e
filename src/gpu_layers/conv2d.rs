use futures_lite::future::block_on;
use wgpu::{self, Adapter, ComputePipeline, Device, PipelineCompilationOptions, Queue};

use crate::error::{Error, Result};
use crate::layers::ConvGeometry;

const WORKGROUP_SIZE: u32 = 8;

/// Stride-1 convolution forward pass on one wgpu device
#[derive(Debug)]
pub struct Conv2DGPU {
    device: Device,
    queue: Queue,
    pipeline: ComputePipeline,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConvParams {
    pub in_channels: u32,
    pub out_channels: u32,
    pub input_height: u32,
    pub input_width: u32,
    pub kernel_height: u32,
    pub kernel_width: u32,
    pub pad_top: u32,
    pub pad_left: u32,
    pub output_height: u32,
    pub output_width: u32,
    // uniform buffers are bound in 16 byte units
    pub _pad: [u32; 2],
}

impl From<&ConvGeometry> for ConvParams {
    fn from(g: &ConvGeometry) -> Self {
        ConvParams {
            in_channels: g.in_channels as u32,
            out_channels: g.filters as u32,
            input_height: g.input_height as u32,
            input_width: g.input_width as u32,
            kernel_height: g.kernel_height as u32,
            kernel_width: g.kernel_width as u32,
            pad_top: g.pad_top as u32,
            pad_left: g.pad_left as u32,
            output_height: g.output_height as u32,
            output_width: g.output_width as u32,
            _pad: [0; 2],
        }
    }
}

impl Conv2DGPU {
    pub fn new(adapter: &Adapter, label: &str) -> Result<Self> {
        // Create the device and queue
        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| Error::Device(format!("{label}: {e}")))?;

        // Load and create the compute shader
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Convolution Shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!("conv2d_shader.wgsl"))),
        });

        // Create the compute pipeline
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Convolution Pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("conv2d_main"),
            compilation_options: PipelineCompilationOptions::default(),
            cache: None,
        });

        Ok(Conv2DGPU { device, queue, pipeline })
    }

    /// Returns the channels-first preactivation, laid out like the CPU path
    pub fn compute(&self, geometry: &ConvGeometry, input: &[f32], weights: &[f32], bias: &[f32]) -> Result<Vec<f32>> {
        let params = ConvParams::from(geometry);
        let output_size = geometry.filters * geometry.output_positions();
        let output_bytes = (output_size * std::mem::size_of::<f32>()) as u64;

        let input_buffer = self.storage_buffer("Input Buffer", input);
        let weight_buffer = self.storage_buffer("Weight Buffer", weights);
        let bias_buffer = self.storage_buffer("Bias Buffer", bias);

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: output_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Params Buffer"),
            size: std::mem::size_of::<ConvParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Convolution Bind Group"),
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: weight_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bias_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Convolution Encoder"),
        });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Convolution Pass"),
                timestamp_writes: None,
            });

            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);

            compute_pass.dispatch_workgroups(
                params.output_width.div_ceil(WORKGROUP_SIZE),
                params.output_height.div_ceil(WORKGROUP_SIZE),
                params.out_channels,
            );
        }

        let output_staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Staging Buffer"),
            size: output_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        encoder.copy_buffer_to_buffer(&output_buffer, 0, &output_staging_buffer, 0, output_bytes);
        self.queue.submit(Some(encoder.finish()));

        // Read the results from staging buffer
        let output_slice = output_staging_buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        output_slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver outlives this callback
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        match block_on(rx.receive()) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(Error::Device(format!("reading convolution output: {e}"))),
            None => return Err(Error::Device("convolution readback was cancelled".to_string())),
        }

        let data = output_slice.get_mapped_range();
        let result = bytemuck::cast_slice::<u8, f32>(&data).to_vec();
        drop(data);
        output_staging_buffer.unmap();

        Ok(result)
    }

    fn storage_buffer(&self, label: &str, data: &[f32]) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of_val(data) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(data));
        buffer
    }

    /// Frees the device's resources without waiting for the last handle to drop
    pub fn destroy(&self) {
        self.device.destroy();
    }
}
