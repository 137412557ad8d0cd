//! GPU wrapper
//!
//! The thin slice of wgpu the reconstruction pipeline needs: context
//! creation, 2D textures with their two creation paths (sampled/uploaded
//! vs. storage-bound), the atomic counter and indirect-draw buffers, and
//! staged validation-error logging. No scene graph.

pub mod shaders;

use anyhow::{Context as _, Result};
use log::{error, info};

/// Descriptor for a host-owned texture the synthesizer adopts as a view.
///
/// The synthesizer never frees the underlying texture; the host guarantees
/// it stays valid between the `set_*_texture` call and the next
/// `synthesize` return.
#[derive(Debug, Clone)]
pub struct TextureProperty {
    pub texture: wgpu::Texture,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

/// Device + queue pair. The render thread owns it and is the only mutator
/// of every GPU object created from it.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Creates a headless context on the best available adapter.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("Failed to find a GPU adapter")?;

        let adapter_info = adapter.get_info();
        info!(
            "GPU: {} (Backend: {:?}, Driver: {})",
            adapter_info.name, adapter_info.backend, adapter_info.driver_info
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("VPCC Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            trace: wgpu::Trace::Off,
        }))
        .context("Failed to create device")?;

        // Playback must survive benign validation noise on some drivers:
        // log uncaptured errors instead of panicking.
        device.on_uncaptured_error(std::sync::Arc::new(|e| {
            error!("uncaptured GPU error: {e}");
        }));

        Ok(Self { device, queue })
    }

    /// Wraps a device/queue pair the host already owns (shared with its
    /// draw pass).
    pub fn from_raw(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }
}

/// Validation scope around one pipeline stage. Errors are logged with the
/// stage name and swallowed; playback continues with the previous state.
pub struct ErrorStage {
    guard: wgpu::ErrorScopeGuard,
    name: &'static str,
}

impl ErrorStage {
    pub fn begin(device: &wgpu::Device, name: &'static str) -> Self {
        let guard = device.push_error_scope(wgpu::ErrorFilter::Validation);
        Self { guard, name }
    }

    /// Pops the scope; returns false (after logging) if the stage raised.
    pub fn end(self) -> bool {
        match pollster::block_on(self.guard.pop()) {
            Some(e) => {
                error!("GPU error in {}: {e}", self.name);
                false
            }
            None => true,
        }
    }
}

/// A 2D texture plus its default view.
///
/// Two creation paths mirror the pipeline's needs: `sampled` for textures
/// refreshed from the CPU every frame, `storage` for compute-written
/// images. Storage textures cannot be resized; `recreate` allocates a new
/// one and drops the old.
pub struct Texture2D {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

impl Texture2D {
    fn create(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    /// CPU-uploaded input texture.
    pub fn sampled(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self::create(
            device,
            label,
            width,
            height,
            format,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        )
    }

    /// Compute-written image, also readable as a sampled texture.
    pub fn storage(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self::create(
            device,
            label,
            width,
            height,
            format,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST,
        )
    }

    /// Adopts a host-owned texture as a non-owning view.
    pub fn from_property(property: &TextureProperty) -> Self {
        let view = property
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture: property.texture.clone(),
            view,
            width: property.width,
            height: property.height,
            format: property.format,
        }
    }

    pub fn upload(&self, queue: &wgpu::Queue, data: &[u8], bytes_per_row: u32) {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn size_differs(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }
}

/// Single-`u32` storage buffer used as the live point counter.
pub struct CounterBuffer {
    buffer: wgpu::Buffer,
}

impl CounterBuffer {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Vertex Counter"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer }
    }

    /// Writes zero into the counter ahead of a rebuild.
    pub fn reset(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&0u32));
    }

    /// Copies the counter into the first word of the host's indirect draw
    /// buffer. The submit boundary orders this after the build dispatch
    /// and before any later draw on the same queue.
    pub fn publish_to(&self, encoder: &mut wgpu::CommandEncoder, indirect: &wgpu::Buffer) {
        encoder.copy_buffer_to_buffer(
            &self.buffer,
            0,
            indirect,
            0,
            std::mem::size_of::<u32>() as u64,
        );
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Uniform buffer holding one plain-old-data record.
pub struct UniformBuffer<T: bytemuck::Pod> {
    buffer: wgpu::Buffer,
    _marker: std::marker::PhantomData<T>,
}

impl<T: bytemuck::Pod> UniformBuffer<T> {
    pub fn new(device: &wgpu::Device, label: &str) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<T>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn write(&self, queue: &wgpu::Queue, value: &T) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(value));
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Compiles a compute program inside a validation scope so a broken shader
/// is reported as an error value instead of a panic.
pub fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    layout: &wgpu::PipelineLayout,
) -> Result<wgpu::ComputePipeline, crate::error::Error> {
    let guard = device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    match pollster::block_on(guard.pop()) {
        Some(e) => Err(crate::error::Error::Gpu {
            stage: "program link",
            message: e.to_string(),
        }),
        None => Ok(pipeline),
    }
}
