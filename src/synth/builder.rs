//! Model-builder compute pipeline
//!
//! Turns occupancy-masked atlas pixels into a densely packed point cloud:
//! one compute pass unprojects each live pixel, appends it to the position
//! and canvas images at an atomically allocated index, and the final point
//! count is copied into the host's indirect draw buffer so the draw needs
//! no CPU round-trip. Two builder variants are linked from one shader
//! source: fixed global decimation and per-block dynamic decimation.

use crate::error::Error;
use crate::gpu::shaders::{
    self, CLEAR_IMAGE_SHADER, DECIMATION_SHADER, MODEL_BUILDER_SHADER, TOGGLE_DYNAMIC,
    TOGGLE_FIXED, TOGGLE_SHADOW, WORKGROUP_SIZE,
};
use crate::gpu::{CounterBuffer, ErrorStage, Texture2D, UniformBuffer};
use crate::synth::packer::MetadataPacker;
use crate::vpcc::{GenericMetadata, BLOCK_SIZE};
use log::{debug, info, warn};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BuilderParams {
    width: u32,
    height: u32,
    vert_incr: u32,
    decimation_level: u32,
    norm_res_factor: f32,
    shadow_res_factor: f32,
    n_off: f32,
    t_off: f32,
    b_off: f32,
    pad: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DecimationParams {
    mvp: [f32; 16],
    block_w: u32,
    block_h: u32,
    r1: f32,
    r2: f32,
    vp_cull_factor: f32,
    norm_res_factor: f32,
    pad: [f32; 2],
}

const IDENTITY_MVP: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

fn storage_texture_entry(binding: u32, format: wgpu::TextureFormat) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn sampled_texture_entry(
    binding: u32,
    sample_type: wgpu::TextureSampleType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// The compute pipeline and its per-frame state. All GPU objects live on
/// the render thread.
pub struct ModelBuilder {
    render_shadow: bool,

    build_fixed: wgpu::ComputePipeline,
    build_dynamic: wgpu::ComputePipeline,
    decimation: wgpu::ComputePipeline,
    clear_image: Option<wgpu::ComputePipeline>,

    // The image/counter group mirrors the shader's explicit bindings 0..3;
    // entries must be assembled in exactly that order.
    images_layout: wgpu::BindGroupLayout,
    inputs_fixed_layout: wgpu::BindGroupLayout,
    inputs_dynamic_layout: wgpu::BindGroupLayout,
    decimation_images_layout: wgpu::BindGroupLayout,
    decimation_inputs_layout: wgpu::BindGroupLayout,
    clear_layout: wgpu::BindGroupLayout,

    counter: CounterBuffer,
    builder_params: UniformBuffer<BuilderParams>,
    decimation_params: UniformBuffer<DecimationParams>,

    packer: MetadataPacker,
    decimation_tex: Option<Texture2D>,
    init_size: Option<(u32, u32)>,
    last_frame_id: i32,

    // Host-set state.
    position_tex: Option<Texture2D>,
    shadow_tex: Option<Texture2D>,
    indirect_buffer: Option<wgpu::Buffer>,
    mvp: [f32; 16],
    decimation_level: u32,
    num_vertex_per_point: u32,
    max_bbox: f32,
    n_off: f32,
    t_off: f32,
    b_off: f32,
    r1: f32,
    r2: f32,
    vp_cull_factor: f32,
    use_dynamic_decimation: bool,
    force_rebuild: bool,
}

impl ModelBuilder {
    pub fn new(device: &wgpu::Device, render_shadow: bool) -> Result<Self, Error> {
        let limits = device.limits();
        info!(
            "Compute capabilities: max workgroup invocations = {}, max workgroups per dim = {}",
            limits.max_compute_invocations_per_workgroup, limits.max_compute_workgroups_per_dimension
        );

        let mut image_entries = vec![
            storage_texture_entry(0, wgpu::TextureFormat::Rgba32Float),
            storage_texture_entry(1, wgpu::TextureFormat::Rgba32Float),
        ];
        if render_shadow {
            image_entries.push(storage_texture_entry(2, wgpu::TextureFormat::Rgba32Float));
        }
        image_entries.push(wgpu::BindGroupLayoutEntry {
            binding: 3,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        let images_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Builder Images Layout"),
            entries: &image_entries,
        });

        let unfilterable = wgpu::TextureSampleType::Float { filterable: false };
        let mut input_entries = vec![
            sampled_texture_entry(0, unfilterable),
            sampled_texture_entry(1, unfilterable),
            sampled_texture_entry(2, unfilterable),
            sampled_texture_entry(3, unfilterable),
            sampled_texture_entry(4, unfilterable),
        ];
        let fixed_entries = {
            let mut entries = input_entries.clone();
            entries.push(uniform_entry(6));
            entries
        };
        input_entries.push(sampled_texture_entry(5, wgpu::TextureSampleType::Uint));
        input_entries.push(uniform_entry(6));

        let inputs_fixed_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Builder Inputs Layout"),
                entries: &fixed_entries,
            });
        let inputs_dynamic_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Builder Inputs Layout (Dynamic)"),
                entries: &input_entries,
            });

        let decimation_images_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Decimation Image Layout"),
                entries: &[storage_texture_entry(0, wgpu::TextureFormat::Rgba8Uint)],
            });
        let decimation_inputs_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Decimation Inputs Layout"),
                entries: &[
                    sampled_texture_entry(0, unfilterable),
                    sampled_texture_entry(1, unfilterable),
                    sampled_texture_entry(2, unfilterable),
                    uniform_entry(3),
                ],
            });
        let clear_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Clear Image Layout"),
            entries: &[storage_texture_entry(0, wgpu::TextureFormat::Rgba32Float)],
        });

        let build_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Builder Pipeline Layout"),
            bind_group_layouts: &[&images_layout, &inputs_fixed_layout],
            immediate_size: 0,
        });
        let build_dynamic_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Builder Pipeline Layout (Dynamic)"),
            bind_group_layouts: &[&images_layout, &inputs_dynamic_layout],
            immediate_size: 0,
        });
        let decimation_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Decimation Pipeline Layout"),
            bind_group_layouts: &[&decimation_images_layout, &decimation_inputs_layout],
            immediate_size: 0,
        });
        let clear_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Clear Pipeline Layout"),
            bind_group_layouts: &[&clear_layout],
            immediate_size: 0,
        });

        let shadow_toggles: &[&str] = if render_shadow {
            &[TOGGLE_FIXED, TOGGLE_SHADOW]
        } else {
            &[TOGGLE_FIXED]
        };
        let fixed_source = shaders::specialize(MODEL_BUILDER_SHADER, shadow_toggles);
        let dynamic_toggles: &[&str] = if render_shadow {
            &[TOGGLE_DYNAMIC, TOGGLE_SHADOW]
        } else {
            &[TOGGLE_DYNAMIC]
        };
        let dynamic_source = shaders::specialize(MODEL_BUILDER_SHADER, dynamic_toggles);

        let build_fixed =
            crate::gpu::create_compute_pipeline(device, "Model Builder", &fixed_source, &build_layout)?;
        let build_dynamic = crate::gpu::create_compute_pipeline(
            device,
            "Model Builder (Dynamic Decimation)",
            &dynamic_source,
            &build_dynamic_layout,
        )?;
        let decimation = crate::gpu::create_compute_pipeline(
            device,
            "Decimation",
            DECIMATION_SHADER,
            &decimation_layout,
        )?;
        let clear_image = if render_shadow {
            Some(crate::gpu::create_compute_pipeline(
                device,
                "Clear Image",
                CLEAR_IMAGE_SHADER,
                &clear_pipeline_layout,
            )?)
        } else {
            None
        };

        Ok(Self {
            render_shadow,
            build_fixed,
            build_dynamic,
            decimation,
            clear_image,
            images_layout,
            inputs_fixed_layout,
            inputs_dynamic_layout,
            decimation_images_layout,
            decimation_inputs_layout,
            clear_layout,
            counter: CounterBuffer::new(device),
            builder_params: UniformBuffer::new(device, "Builder Params"),
            decimation_params: UniformBuffer::new(device, "Decimation Params"),
            packer: MetadataPacker::new(),
            decimation_tex: None,
            init_size: None,
            last_frame_id: -1,
            position_tex: None,
            shadow_tex: None,
            indirect_buffer: None,
            mvp: IDENTITY_MVP,
            decimation_level: 1,
            num_vertex_per_point: 1,
            max_bbox: 2048.0,
            n_off: 0.0,
            t_off: 0.0,
            b_off: 0.0,
            r1: 20.0,
            r2: 50.0,
            vp_cull_factor: 1.5,
            use_dynamic_decimation: false,
            force_rebuild: false,
        })
    }

    pub fn set_position_texture(&mut self, texture: Texture2D) {
        self.position_tex = Some(texture);
    }

    pub fn set_shadow_texture(&mut self, texture: Texture2D) {
        self.shadow_tex = Some(texture);
    }

    pub fn set_indirect_buffer(&mut self, buffer: wgpu::Buffer) {
        self.indirect_buffer = Some(buffer);
    }

    pub fn set_mvp(&mut self, mvp: [f32; 16]) {
        self.mvp = mvp;
    }

    pub fn set_decimation_level(&mut self, level: u32) {
        self.decimation_level = level.max(1);
    }

    pub fn set_num_vertex_per_point(&mut self, count: u32) {
        self.num_vertex_per_point = count.max(1);
    }

    pub fn set_max_bbox(&mut self, size: f32) {
        self.max_bbox = size;
    }

    pub fn set_global_patch_offsets(&mut self, n_off: f32, t_off: f32, b_off: f32) {
        self.n_off = n_off;
        self.t_off = t_off;
        self.b_off = b_off;
    }

    pub fn set_dynamic_decimation(&mut self, enabled: bool) {
        self.use_dynamic_decimation = enabled;
    }

    pub fn set_decimation_ranges(&mut self, r1: f32, r2: f32, vp_cull_factor: f32) {
        self.r1 = r1;
        self.r2 = r2;
        self.vp_cull_factor = vp_cull_factor;
    }

    pub fn set_force_rebuild(&mut self, force: bool) {
        self.force_rebuild = force;
    }

    pub fn last_frame_id(&self) -> i32 {
        self.last_frame_id
    }

    /// Reconstructs one frame into the canvas/position images and
    /// publishes the point count. Skips the dispatch entirely when the
    /// rebuild gate says the previous build is still valid; the indirect
    /// buffer keeps the last good count either way.
    pub fn build(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        metadata: &GenericMetadata,
        occupancy: &Texture2D,
        geometry: &Texture2D,
        texture: &Texture2D,
        canvas: &Texture2D,
    ) {
        let Some(frame) = metadata.vpcc.as_ref() else {
            warn!("model builder: metadata carries no patch data, frame skipped");
            return;
        };

        let width = texture.width();
        let height = texture.height();
        if width == 0
            || height == 0
            || occupancy.width() == 0
            || occupancy.height() == 0
            || geometry.width() == 0
            || geometry.height() == 0
            || canvas.width() == 0
            || canvas.height() == 0
        {
            debug!("model builder: zero-sized input map, frame skipped");
            return;
        }
        if self.position_tex.is_none() {
            warn!("model builder: position texture not set, frame skipped");
            return;
        }

        // Shadow rendering needs a usable target for the whole pass family
        // (the builder shader writes the shadow image too).
        let mut shadow_size = (0u32, 0u32);
        let mut shadow_factor = 1.0f32;
        if self.render_shadow {
            match &self.shadow_tex {
                Some(shadow) if shadow.width() > 0 && shadow.height() > 0 => {
                    shadow_size = (shadow.width(), shadow.height());
                    shadow_factor = shadow.width() as f32 / self.max_bbox;
                }
                _ => {
                    debug!("model builder: shadow map missing or zero-sized, frame skipped");
                    return;
                }
            }
        }

        let size_changed = self.init_size != Some((width, height));
        if size_changed {
            self.decimation_tex = Some(Texture2D::storage(
                device,
                "Decimation Levels",
                width / BLOCK_SIZE,
                height / BLOCK_SIZE,
                wgpu::TextureFormat::Rgba8Uint,
            ));
            self.init_size = Some((width, height));
        }

        let is_new_frame = frame.frame_index != self.last_frame_id;
        if is_new_frame {
            if self.packer.pack(device, queue, frame, width, height) {
                self.last_frame_id = frame.frame_index;
            } else if self.packer.packed_frame_index() != frame.frame_index {
                // Bad metadata: keep the previous build untouched.
                return;
            }
        }

        // Rebuild gate: the indirect buffer still reflects the previous
        // atomic value, so a skipped dispatch keeps the draw correct.
        if !(self.use_dynamic_decimation || self.force_rebuild || is_new_frame) {
            return;
        }

        let (Some(uv0uv1), Some(d1nop)) = (self.packer.uv0uv1(), self.packer.d1nop()) else {
            return;
        };
        let Some(position_tex) = &self.position_tex else {
            return;
        };
        let Some(decimation_tex) = &self.decimation_tex else {
            return;
        };

        let norm_factor = 1.0 / self.max_bbox;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Model Builder"),
        });

        if self.render_shadow {
            if let (Some(clear), Some(shadow)) = (&self.clear_image, &self.shadow_tex) {
                let stage = ErrorStage::begin(device, "shadow clear");
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Shadow Clear Bind Group"),
                    layout: &self.clear_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(shadow.view()),
                    }],
                });
                {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("Shadow Clear"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(clear);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.dispatch_workgroups(
                        shadow_size.0.div_ceil(WORKGROUP_SIZE),
                        shadow_size.1.div_ceil(WORKGROUP_SIZE),
                        1,
                    );
                }
                stage.end();
            }
        }

        if self.use_dynamic_decimation {
            let stage = ErrorStage::begin(device, "decimation");
            self.decimation_params.write(
                queue,
                &DecimationParams {
                    mvp: self.mvp,
                    block_w: width / BLOCK_SIZE,
                    block_h: height / BLOCK_SIZE,
                    r1: self.r1,
                    r2: self.r2,
                    vp_cull_factor: self.vp_cull_factor,
                    norm_res_factor: norm_factor,
                    pad: [0.0; 2],
                },
            );

            let images = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Decimation Image Bind Group"),
                layout: &self.decimation_images_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(decimation_tex.view()),
                }],
            });
            let inputs = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Decimation Inputs Bind Group"),
                layout: &self.decimation_inputs_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(geometry.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(uv0uv1.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(d1nop.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: self.decimation_params.buffer().as_entire_binding(),
                    },
                ],
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Decimation"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.decimation);
                pass.set_bind_group(0, &images, &[]);
                pass.set_bind_group(1, &inputs, &[]);
                // One invocation per block, 16x16 blocks per workgroup.
                pass.dispatch_workgroups(width / 256 + 1, height / 256 + 1, 1);
            }
            stage.end();
        }

        self.counter.reset(queue);
        self.builder_params.write(
            queue,
            &BuilderParams {
                width,
                height,
                vert_incr: self.num_vertex_per_point,
                decimation_level: self.decimation_level,
                norm_res_factor: norm_factor,
                shadow_res_factor: shadow_factor,
                n_off: self.n_off,
                t_off: self.t_off,
                b_off: self.b_off,
                pad: [0.0; 3],
            },
        );

        let stage = ErrorStage::begin(device, "model build");

        // Fixed order: position 0, canvas 1, shadow 2, counter 3, matching
        // the shader's explicit bindings.
        let mut image_entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(position_tex.view()),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(canvas.view()),
            },
        ];
        if self.render_shadow {
            if let Some(shadow) = &self.shadow_tex {
                image_entries.push(wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(shadow.view()),
                });
            }
        }
        image_entries.push(wgpu::BindGroupEntry {
            binding: 3,
            resource: self.counter.buffer().as_entire_binding(),
        });
        let images = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Builder Images Bind Group"),
            layout: &self.images_layout,
            entries: &image_entries,
        });

        let mut input_entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(texture.view()),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(geometry.view()),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(occupancy.view()),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(uv0uv1.view()),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(d1nop.view()),
            },
        ];
        if self.use_dynamic_decimation {
            input_entries.push(wgpu::BindGroupEntry {
                binding: 5,
                resource: wgpu::BindingResource::TextureView(decimation_tex.view()),
            });
        }
        input_entries.push(wgpu::BindGroupEntry {
            binding: 6,
            resource: self.builder_params.buffer().as_entire_binding(),
        });
        let inputs_layout = if self.use_dynamic_decimation {
            &self.inputs_dynamic_layout
        } else {
            &self.inputs_fixed_layout
        };
        let inputs = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Builder Inputs Bind Group"),
            layout: inputs_layout,
            entries: &input_entries,
        });

        let builder = if self.use_dynamic_decimation {
            &self.build_dynamic
        } else {
            &self.build_fixed
        };
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Model Build"),
                timestamp_writes: None,
            });
            pass.set_pipeline(builder);
            pass.set_bind_group(0, &images, &[]);
            pass.set_bind_group(1, &inputs, &[]);
            // Over-cover the atlas so edge blocks are included.
            pass.dispatch_workgroups(
                width / WORKGROUP_SIZE + 1,
                height / WORKGROUP_SIZE + 1,
                1,
            );
        }
        stage.end();

        let stage = ErrorStage::begin(device, "indirect publish");
        if let Some(indirect) = &self.indirect_buffer {
            self.counter.publish_to(&mut encoder, indirect);
        }
        queue.submit(Some(encoder.finish()));
        stage.end();
    }
}
