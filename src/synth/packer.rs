//! Patch-metadata packer
//!
//! Flattens a frame's patch metadata into two per-block RGBA32F lookup
//! textures for the compute passes: `uv0uv1` carries the patch's 2D/3D
//! origins, `d1nop` its depth origin, normal axis, orientation and
//! projection mode. Values are packed as floats because the shader mixes
//! them into float arithmetic and nothing exceeds 16-bit resolution.

use crate::error::Error;
use crate::gpu::Texture2D;
use crate::vpcc::{FrameMetadata, BLOCK_SIZE};
use log::error;

/// Fills the two staging tables from the block map. Both vectors are
/// resized to exactly `4 * block_count`; empty blocks pack as zeros.
/// Fails without touching the outputs when the block map does not cover
/// the grid.
pub fn fill_block_tables(
    metadata: &FrameMetadata,
    uv0uv1: &mut Vec<f32>,
    d1nop: &mut Vec<f32>,
) -> Result<usize, Error> {
    metadata.validate()?;

    let count = metadata.block_to_patch.len();
    // Grow-only staging: reuse the larger allocation across frames.
    if uv0uv1.len() < count * 4 {
        uv0uv1.resize(count * 4, 0.0);
        d1nop.resize(count * 4, 0.0);
    }

    for (block, &entry) in metadata.block_to_patch.iter().enumerate() {
        let base = block * 4;
        if entry == 0 {
            uv0uv1[base..base + 4].fill(0.0);
            d1nop[base..base + 4].fill(0.0);
            continue;
        }

        let patch = &metadata.patches[(entry - 1) as usize];
        uv0uv1[base] = f32::from(patch.u0);
        uv0uv1[base + 1] = f32::from(patch.v0);
        uv0uv1[base + 2] = f32::from(patch.u1);
        uv0uv1[base + 3] = f32::from(patch.v1);

        d1nop[base] = f32::from(patch.d1);
        d1nop[base + 1] = f32::from(patch.normal_axis);
        d1nop[base + 2] = f32::from(patch.orientation);
        d1nop[base + 3] = f32::from(patch.projection_mode);
    }

    Ok(count)
}

/// Owns the block-meta textures and their grow-only CPU staging, cached by
/// metadata frame index.
pub struct MetadataPacker {
    staging_uv0uv1: Vec<f32>,
    staging_d1nop: Vec<f32>,
    tex_uv0uv1: Option<Texture2D>,
    tex_d1nop: Option<Texture2D>,
    packed_frame_index: i32,
    grid: (u32, u32),
}

impl Default for MetadataPacker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataPacker {
    pub fn new() -> Self {
        Self {
            staging_uv0uv1: Vec::new(),
            staging_d1nop: Vec::new(),
            tex_uv0uv1: None,
            tex_d1nop: None,
            packed_frame_index: -1,
            grid: (0, 0),
        }
    }

    /// Re-packs the textures when `metadata` is a new frame; a repeated
    /// frame index is a cache hit and touches nothing. Bad metadata is
    /// logged and leaves the previous textures in place.
    ///
    /// Returns true when the textures were refreshed.
    pub fn pack(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        metadata: &FrameMetadata,
        atlas_width: u32,
        atlas_height: u32,
    ) -> bool {
        if metadata.frame_index == self.packed_frame_index {
            return false;
        }

        let grid = (atlas_width / BLOCK_SIZE, atlas_height / BLOCK_SIZE);
        let count =
            match fill_block_tables(metadata, &mut self.staging_uv0uv1, &mut self.staging_d1nop) {
                Ok(count) => count,
                Err(e) => {
                    error!("metadata pack skipped: {e}");
                    return false;
                }
            };

        if self.grid != grid || self.tex_uv0uv1.is_none() {
            self.tex_uv0uv1 = Some(Texture2D::sampled(
                device,
                "BlockMeta uv0uv1",
                grid.0,
                grid.1,
                wgpu::TextureFormat::Rgba32Float,
            ));
            self.tex_d1nop = Some(Texture2D::sampled(
                device,
                "BlockMeta d1nop",
                grid.0,
                grid.1,
                wgpu::TextureFormat::Rgba32Float,
            ));
            self.grid = grid;
        }

        let bytes_per_row = grid.0 * 16;
        if let Some(tex) = &self.tex_uv0uv1 {
            tex.upload(
                queue,
                bytemuck::cast_slice(&self.staging_uv0uv1[..count * 4]),
                bytes_per_row,
            );
        }
        if let Some(tex) = &self.tex_d1nop {
            tex.upload(
                queue,
                bytemuck::cast_slice(&self.staging_d1nop[..count * 4]),
                bytes_per_row,
            );
        }

        self.packed_frame_index = metadata.frame_index;
        true
    }

    pub fn uv0uv1(&self) -> Option<&Texture2D> {
        self.tex_uv0uv1.as_ref()
    }

    pub fn d1nop(&self) -> Option<&Texture2D> {
        self.tex_d1nop.as_ref()
    }

    pub fn packed_frame_index(&self) -> i32 {
        self.packed_frame_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vpcc::Patch;

    fn two_block_metadata() -> FrameMetadata {
        FrameMetadata {
            frame_index: 5,
            frame_width: 32,
            frame_height: 16,
            patches: vec![Patch {
                u0: 1,
                v0: 2,
                u1: 3,
                v1: 4,
                d1: 500,
                normal_axis: 2,
                orientation: 1,
                projection_mode: 1,
            }],
            block_to_patch: vec![0, 1],
        }
    }

    #[test]
    fn test_pack_roundtrips_patch_integers() {
        let metadata = two_block_metadata();
        let mut uv = Vec::new();
        let mut dn = Vec::new();
        let count = fill_block_tables(&metadata, &mut uv, &mut dn).unwrap();
        assert_eq!(count, 2);

        // Empty block packs as zeros.
        assert_eq!(&uv[0..4], &[0.0; 4]);
        assert_eq!(&dn[0..4], &[0.0; 4]);

        // The occupied block reads back the 8 patch integers exactly.
        assert_eq!(&uv[4..8], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&dn[4..8], &[500.0, 2.0, 1.0, 1.0]);
    }

    #[test]
    fn test_staging_grows_but_never_shrinks() {
        let metadata = two_block_metadata();
        let mut uv = vec![9.0; 64];
        let mut dn = vec![9.0; 64];
        fill_block_tables(&metadata, &mut uv, &mut dn).unwrap();
        assert_eq!(uv.len(), 64);
        // Only the live prefix is rewritten.
        assert_eq!(uv[8], 9.0);
    }

    #[test]
    fn test_block_map_mismatch_leaves_staging_untouched() {
        let mut metadata = two_block_metadata();
        metadata.block_to_patch.push(0);
        let mut uv = vec![7.0; 8];
        let mut dn = vec![7.0; 8];
        assert!(fill_block_tables(&metadata, &mut uv, &mut dn).is_err());
        assert!(uv.iter().all(|&v| v == 7.0));
        assert!(dn.iter().all(|&v| v == 7.0));
    }
}
