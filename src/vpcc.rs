//! V-PCC frame metadata
//!
//! The parsed per-frame patch metadata the upstream bitstream parser
//! produces, and the generic metadata envelope that travels the pipeline
//! alongside the video streams.

use crate::error::Error;
use crate::media::StreamKind;

/// The unit of patch assignment: a block is a 16x16 pixel region of the
/// atlas.
pub const BLOCK_SIZE: u32 = 16;

/// Unprojection parameters for one patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Patch {
    /// Patch origin in the 2D atlas, in block units.
    pub u0: u16,
    pub v0: u16,
    /// Patch origin in 3D tangent/bitangent coordinates, in pixels.
    pub u1: u16,
    pub v1: u16,
    /// Patch origin along its normal axis.
    pub d1: u16,
    /// Which of X/Y/Z is the normal direction (0..=2).
    pub normal_axis: u8,
    /// 1 swaps tangent and bitangent.
    pub orientation: u8,
    /// 0 = positive offset along the normal, 1 = negative.
    pub projection_mode: u8,
}

/// One reconstructed 3D frame's worth of patch metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMetadata {
    /// Monotonically increasing per stream; a wrap to a smaller value
    /// marks a new GOP.
    pub frame_index: i32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub patches: Vec<Patch>,
    /// One entry per block, row-major over the block grid; 0 means the
    /// block is empty, otherwise `patch_index + 1`.
    pub block_to_patch: Vec<u32>,
}

impl FrameMetadata {
    /// Block grid dimensions `(frame_width / 16, frame_height / 16)`.
    pub fn block_grid(&self) -> (u32, u32) {
        (
            self.frame_width / BLOCK_SIZE,
            self.frame_height / BLOCK_SIZE,
        )
    }

    /// Checks the structural invariants: the block map covers the grid
    /// exactly and every non-zero entry indexes a valid patch.
    pub fn validate(&self) -> Result<(), Error> {
        let (grid_w, grid_h) = self.block_grid();
        let expected = (grid_w * grid_h) as usize;
        if self.block_to_patch.len() != expected {
            return Err(Error::BadMetadata(format!(
                "block map has {} entries, grid {}x{} needs {}",
                self.block_to_patch.len(),
                grid_w,
                grid_h,
                expected
            )));
        }

        let occupied = self.block_to_patch.iter().any(|&entry| entry != 0);
        if occupied && self.patches.is_empty() {
            return Err(Error::BadMetadata(
                "non-empty block map with empty patch list".into(),
            ));
        }

        for (block, &entry) in self.block_to_patch.iter().enumerate() {
            if entry != 0 && (entry - 1) as usize >= self.patches.len() {
                return Err(Error::BadMetadata(format!(
                    "block {} references patch {} of {}",
                    block,
                    entry - 1,
                    self.patches.len()
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentType {
    #[default]
    Unknown,
    Miv,
    Vpcc,
}

/// Metadata envelope paired with the decoded video frames of one 3D frame.
#[derive(Debug, Clone, Default)]
pub struct GenericMetadata {
    pub content_type: ContentType,
    pub vpcc: Option<FrameMetadata>,
    /// Provenance tags used for trick-play / stream-switch filtering.
    pub content_id: i32,
    pub segment_id: i32,
    /// Which auxiliary streams the active atlas carries. Texture is
    /// implied and always expected.
    pub has_occupancy: bool,
    pub has_geometry: bool,
    pub has_transparency: bool,
}

impl GenericMetadata {
    /// A V-PCC envelope: occupancy and geometry are always present,
    /// transparency never is.
    pub fn vpcc(metadata: FrameMetadata, content_id: i32, segment_id: i32) -> Self {
        Self {
            content_type: ContentType::Vpcc,
            vpcc: Some(metadata),
            content_id,
            segment_id,
            has_occupancy: true,
            has_geometry: true,
            has_transparency: false,
        }
    }

    /// Whether `kind` is expected to deliver a frame for this metadata.
    pub fn expects(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Texture => true,
            StreamKind::Occupancy => self.has_occupancy,
            StreamKind::Geometry => self.has_geometry,
            StreamKind::Transparency => self.has_transparency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_patch_frame() -> FrameMetadata {
        FrameMetadata {
            frame_index: 0,
            frame_width: 16,
            frame_height: 16,
            patches: vec![Patch {
                d1: 100,
                ..Patch::default()
            }],
            block_to_patch: vec![1],
        }
    }

    #[test]
    fn test_valid_metadata_passes() {
        assert!(single_patch_frame().validate().is_ok());
    }

    #[test]
    fn test_block_map_length_mismatch() {
        let mut frame = single_patch_frame();
        frame.block_to_patch = vec![1, 0];
        assert!(matches!(
            frame.validate(),
            Err(Error::BadMetadata(_))
        ));
    }

    #[test]
    fn test_out_of_range_patch_index() {
        let mut frame = single_patch_frame();
        frame.block_to_patch = vec![2];
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_occupied_map_with_no_patches() {
        let mut frame = single_patch_frame();
        frame.patches.clear();
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_empty_map_with_no_patches_is_valid() {
        let frame = FrameMetadata {
            frame_index: 0,
            frame_width: 32,
            frame_height: 16,
            patches: Vec::new(),
            block_to_patch: vec![0, 0],
        };
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_vpcc_envelope_expectations() {
        let envelope = GenericMetadata::vpcc(single_patch_frame(), 1, 2);
        assert!(envelope.expects(StreamKind::Texture));
        assert!(envelope.expects(StreamKind::Occupancy));
        assert!(envelope.expects(StreamKind::Geometry));
        assert!(!envelope.expects(StreamKind::Transparency));
    }
}
