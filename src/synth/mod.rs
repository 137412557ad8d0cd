//! Synthesizer
//!
//! The facade the render thread drives: owns the model-builder pipeline
//! and the block-meta packer, adopts the host's canvas/position/shadow
//! textures and indirect buffer, and exposes the one synthesize-per-frame
//! entry point with its rebuild-only-when-needed policy.

pub mod builder;
pub mod packer;
pub mod unproject;

pub use builder::ModelBuilder;
pub use packer::MetadataPacker;

use crate::config::SynthesizerConfig;
use crate::gpu::{GpuContext, Texture2D, TextureProperty};
use crate::vpcc::GenericMetadata;
use log::{error, info, warn};

/// Per-frame reconstruction facade.
///
/// Construction failures (shader link) leave the synthesizer unusable:
/// every subsequent `synthesize` is a logged no-op, so the host keeps
/// drawing the last valid point cloud.
pub struct Synthesizer {
    ctx: GpuContext,
    builder: Option<ModelBuilder>,
    export_metadata: bool,
    exported_frame_index: i32,
    frame_index: i32,
    gop_index: i32,
}

impl Synthesizer {
    pub fn new(ctx: GpuContext, config: &SynthesizerConfig) -> Self {
        let builder = match ModelBuilder::new(&ctx.device, config.render_shadow) {
            Ok(mut builder) => {
                builder.set_max_bbox(config.max_bbox);
                builder.set_decimation_level(config.decimation_level);
                builder.set_num_vertex_per_point(config.num_vertex_per_point);
                builder.set_dynamic_decimation(config.use_dynamic_decimation);
                builder.set_decimation_ranges(config.r1, config.r2, config.vp_cull_factor);
                info!(
                    "synthesizer ready ({})",
                    if config.render_shadow {
                        "model builder + shadow"
                    } else {
                        "model builder"
                    }
                );
                Some(builder)
            }
            Err(e) => {
                error!("synthesizer unusable: {e}");
                None
            }
        };

        Self {
            ctx,
            builder,
            export_metadata: config.export_metadata,
            exported_frame_index: -1,
            frame_index: 0,
            gop_index: 0,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.builder.is_some()
    }

    /// Observed GOP count: incremented on every `frame_index` wrap.
    pub fn gop_index(&self) -> i32 {
        self.gop_index
    }

    pub fn frame_index(&self) -> i32 {
        self.frame_index
    }

    pub fn set_position_texture(&mut self, property: &TextureProperty) {
        if let Some(builder) = &mut self.builder {
            builder.set_position_texture(Texture2D::from_property(property));
        }
    }

    pub fn set_shadow_texture(&mut self, property: &TextureProperty) {
        if let Some(builder) = &mut self.builder {
            builder.set_shadow_texture(Texture2D::from_property(property));
        }
    }

    /// The synthesizer writes the live point count into the first word of
    /// this buffer; the host initializes the remaining three words.
    pub fn set_indirect_buffer(&mut self, buffer: wgpu::Buffer) {
        if let Some(builder) = &mut self.builder {
            builder.set_indirect_buffer(buffer);
        }
    }

    pub fn set_mvp(&mut self, mvp: [f32; 16]) {
        if let Some(builder) = &mut self.builder {
            builder.set_mvp(mvp);
        }
    }

    pub fn set_decimation_level(&mut self, level: u32) {
        if let Some(builder) = &mut self.builder {
            builder.set_decimation_level(level);
        }
    }

    pub fn set_num_vertex_per_point(&mut self, count: u32) {
        if let Some(builder) = &mut self.builder {
            builder.set_num_vertex_per_point(count);
        }
    }

    pub fn set_max_bbox(&mut self, size: f32) {
        if let Some(builder) = &mut self.builder {
            builder.set_max_bbox(size);
        }
    }

    pub fn set_global_3d_patch_offsets(&mut self, n_off: f32, t_off: f32, b_off: f32) {
        if let Some(builder) = &mut self.builder {
            builder.set_global_patch_offsets(n_off, t_off, b_off);
        }
    }

    pub fn set_dynamic_decimation(&mut self, enabled: bool) {
        if let Some(builder) = &mut self.builder {
            builder.set_dynamic_decimation(enabled);
        }
    }

    pub fn set_decimation_ranges(&mut self, r1: f32, r2: f32, vp_cull_factor: f32) {
        if let Some(builder) = &mut self.builder {
            builder.set_decimation_ranges(r1, r2, vp_cull_factor);
        }
    }

    pub fn set_force_rebuild(&mut self, force: bool) {
        if let Some(builder) = &mut self.builder {
            builder.set_force_rebuild(force);
        }
    }

    /// Reconstructs one frame into `canvas` and the configured position /
    /// shadow / indirect targets. Repeated calls with the same metadata
    /// frame index (and no force-rebuild or dynamic decimation) change
    /// nothing.
    ///
    /// Transparency is accepted for interface parity; the baseline builder
    /// ignores it.
    pub fn synthesize(
        &mut self,
        metadata: &GenericMetadata,
        occupancy: &TextureProperty,
        geometry: &TextureProperty,
        texture: &TextureProperty,
        _transparency: Option<&TextureProperty>,
        canvas: &TextureProperty,
    ) {
        if self.builder.is_none() {
            warn!("synthesize skipped: synthesizer is unusable");
            return;
        }

        self.update_index(metadata);
        if self.export_metadata {
            if let Some(frame) = metadata.vpcc.as_ref() {
                if frame.frame_index != self.exported_frame_index {
                    self.exported_frame_index = frame.frame_index;
                    export_metadata(frame);
                }
            }
        }

        let Some(builder) = &mut self.builder else {
            return;
        };
        builder.build(
            &self.ctx.device,
            &self.ctx.queue,
            metadata,
            &Texture2D::from_property(occupancy),
            &Texture2D::from_property(geometry),
            &Texture2D::from_property(texture),
            &Texture2D::from_property(canvas),
        );
    }

    fn update_index(&mut self, metadata: &GenericMetadata) {
        if let Some(frame) = metadata.vpcc.as_ref() {
            // A wrap backwards marks a new GOP. Nothing downstream
            // consumes the counter yet.
            if frame.frame_index < self.frame_index {
                self.gop_index += 1;
            }
            self.frame_index = frame.frame_index;
        }
    }
}

/// Logs every patch's parameters for one metadata frame.
fn export_metadata(frame: &crate::vpcc::FrameMetadata) {
    let total = frame.patches.len();
    for (pid, patch) in frame.patches.iter().enumerate() {
        info!(
            "P{pid}/{total}: 2D = ({}, {}) 3D = ({}, {}, {}) A = {} Or = {} P = {}",
            patch.u0,
            patch.v0,
            patch.u1,
            patch.v1,
            patch.d1,
            patch.normal_axis,
            patch.orientation,
            patch.projection_mode
        );
    }
}
