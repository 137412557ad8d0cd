//! Per-pixel unprojection rule
//!
//! The CPU statement of the reconstruction the build shader performs,
//! shared by the decimation maths and the tests. Coordinates here are
//! dispatch coordinates: `(id_x, id_y)` over the atlas, with the video
//! planes addressed bottom-up by the shader itself.

use crate::vpcc::{Patch, BLOCK_SIZE};

/// Global 3D patch offsets `(N, T, B)` applied before the normal-axis
/// permutation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PatchOffsets {
    pub n: f32,
    pub t: f32,
    pub b: f32,
}

/// Projection sign: +255 for projection mode 0, -255 for mode 1.
pub fn projection_sign(projection_mode: u8) -> f32 {
    255.0 * (1.0 - 2.0 * f32::from(projection_mode))
}

/// Reconstructs the unnormalized world-space point for atlas pixel
/// `(id_x, id_y)` of a patch, given the geometry plane value at that
/// pixel.
pub fn reconstruct_point(
    patch: &Patch,
    id_x: u32,
    id_y: u32,
    geometry: f32,
    offsets: PatchOffsets,
) -> [f32; 3] {
    let proj = projection_sign(patch.projection_mode);

    // u0/v0 are in block units, the invocation id is in atlas pixels.
    // Unsigned wrap matches the shader's arithmetic.
    let origin = [
        id_x.wrapping_sub(u32::from(patch.u0) * BLOCK_SIZE) as f32,
        id_y.wrapping_sub(u32::from(patch.v0) * BLOCK_SIZE) as f32,
    ];
    let orient = usize::from(patch.orientation);
    let t = origin[orient] + f32::from(patch.u1);
    let b = origin[1 - orient] + f32::from(patch.v1);

    let n = f32::from(patch.d1) + geometry * proj;
    let local = [n + offsets.n * proj, b + offsets.b, t + offsets.t];

    // (N, B, T) -> world, permuted by the patch's normal axis.
    match patch.normal_axis {
        1 => [local[1], local[0], local[2]],
        2 => [local[2], local[1], local[0]],
        _ => local,
    }
}

/// Scales a world point by `1 / max_bbox`, the value stored in the
/// position image.
pub fn normalize(point: [f32; 3], max_bbox: f32) -> [f32; 3] {
    let factor = 1.0 / max_bbox;
    [point[0] * factor, point[1] * factor, point[2] * factor]
}

/// Whether the pixel survives decimation at the given level. Level 0 means
/// the block was culled and contributes nothing.
pub fn survives_decimation(id_x: u32, id_y: u32, level: u32) -> bool {
    level != 0 && id_x % level == 0 && id_y % level == 0
}

/// LOD from the projected distance between two neighbouring reconstructed
/// points: wide apart on screen means coarse.
pub fn decimation_level(projected_distance: f32, r1: f32, r2: f32) -> u32 {
    if projected_distance > r2 {
        4
    } else if projected_distance > r1 {
        2
    } else {
        1
    }
}

/// Viewport cull with margin: a block whose centre projects beyond the
/// widened clip box contributes nothing.
pub fn is_culled(ndc_x: f32, ndc_y: f32, vp_cull_factor: f32) -> bool {
    ndc_x.abs() >= vp_cull_factor || ndc_y.abs() >= vp_cull_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vpcc::FrameMetadata;

    const NO_OFFSETS: PatchOffsets = PatchOffsets {
        n: 0.0,
        t: 0.0,
        b: 0.0,
    };

    fn identity_patch() -> Patch {
        Patch {
            u0: 0,
            v0: 0,
            u1: 0,
            v1: 0,
            d1: 100,
            normal_axis: 0,
            orientation: 0,
            projection_mode: 0,
        }
    }

    /// Column-major 4x4 transform, as the MVP uniform is laid out.
    fn transform(mvp: &[f32; 16], p: [f32; 3]) -> [f32; 4] {
        let v = [p[0], p[1], p[2], 1.0];
        let mut out = [0.0f32; 4];
        for (row, slot) in out.iter_mut().enumerate() {
            *slot = (0..4).map(|col| mvp[col * 4 + row] * v[col]).sum();
        }
        out
    }

    /// Emitted point count over a full atlas: occupancy all-one, one
    /// decimation level everywhere.
    fn count_points(width: u32, height: u32, level: u32) -> u32 {
        let mut count = 0;
        for y in 0..height {
            for x in 0..width {
                if survives_decimation(x, y, level) {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_single_patch_identity() {
        // 16x16 atlas, one patch, geometry zero: every pixel lands on the
        // d1 plane with (y, z) sweeping the patch extent.
        let patch = identity_patch();
        let max_bbox = 1024.0;

        assert_eq!(count_points(16, 16, 1), 256);

        for id_y in 0..16 {
            for id_x in 0..16 {
                let p = normalize(
                    reconstruct_point(&patch, id_x, id_y, 0.0, NO_OFFSETS),
                    max_bbox,
                );
                assert_eq!(p[0], 100.0 / 1024.0);
                assert_eq!(p[1], id_y as f32 / 1024.0);
                assert_eq!(p[2], id_x as f32 / 1024.0);
            }
        }
    }

    #[test]
    fn test_decimation_two() {
        assert_eq!(count_points(16, 16, 2), 64);

        let patch = identity_patch();
        for id_y in (0..16).step_by(2) {
            for id_x in (0..16).step_by(2) {
                assert!(survives_decimation(id_x, id_y, 2));
                let p = reconstruct_point(&patch, id_x, id_y, 0.0, NO_OFFSETS);
                // Surviving points have both tangent coords even.
                assert_eq!(p[1] as u32 % 2, 0);
                assert_eq!(p[2] as u32 % 2, 0);
            }
        }
        assert!(!survives_decimation(1, 0, 2));
        assert!(!survives_decimation(0, 3, 2));
    }

    #[test]
    fn test_orientation_swap() {
        let straight = identity_patch();
        let swapped = Patch {
            orientation: 1,
            ..identity_patch()
        };

        for (id_x, id_y) in [(3, 7), (0, 15), (12, 1)] {
            let p = reconstruct_point(&straight, id_x, id_y, 0.0, NO_OFFSETS);
            let q = reconstruct_point(&swapped, id_x, id_y, 0.0, NO_OFFSETS);
            assert_eq!(p[0], q[0]);
            assert_eq!(p[1], q[2]);
            assert_eq!(p[2], q[1]);
        }
    }

    #[test]
    fn test_negative_projection_mode() {
        let patch = Patch {
            projection_mode: 1,
            ..identity_patch()
        };
        // Geometry at full scale: N = 100 - 255 * 1.0.
        let p = normalize(reconstruct_point(&patch, 0, 0, 1.0, NO_OFFSETS), 1024.0);
        assert_eq!(p[0], -155.0 / 1024.0);
    }

    #[test]
    fn test_two_patches_disjoint_axes() {
        // 32x16 atlas, left patch projects along X, right along Z.
        let left = Patch {
            d1: 100,
            normal_axis: 0,
            ..identity_patch()
        };
        let right = Patch {
            u0: 1,
            d1: 200,
            normal_axis: 2,
            ..identity_patch()
        };
        let metadata = FrameMetadata {
            frame_index: 0,
            frame_width: 32,
            frame_height: 16,
            patches: vec![left, right],
            block_to_patch: vec![1, 2],
        };
        assert!(metadata.validate().is_ok());
        assert_eq!(count_points(32, 16, 1), 512);

        let p = reconstruct_point(&left, 4, 5, 0.0, NO_OFFSETS);
        assert_eq!(p, [100.0, 5.0, 4.0]);

        // Right patch pixels sit 16 to the right of its block origin.
        let q = reconstruct_point(&right, 16 + 4, 5, 0.0, NO_OFFSETS);
        // Normal axis 2 swaps X and Z: depth lands on Z.
        assert_eq!(q, [4.0, 5.0, 200.0]);
        // The two reconstructions occupy disjoint axis-aligned planes.
        assert_ne!(p[0], q[0]);
        assert_eq!(q[2], 200.0);
    }

    #[test]
    fn test_viewport_cull_zeroes_block() {
        // A translation far off to the right pushes NDC x beyond the cull
        // margin: the block's level drops to 0 and nothing survives.
        #[rustfmt::skip]
        let mvp: [f32; 16] = [
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            10.0, 0.0, 0.0, 1.0,
        ];

        let patch = identity_patch();
        let p = normalize(reconstruct_point(&patch, 8, 8, 0.0, NO_OFFSETS), 1024.0);
        let clip = transform(&mvp, p);
        let ndc = [clip[0] / clip[3], clip[1] / clip[3]];

        assert!(is_culled(ndc[0], ndc[1], 1.5));
        let level = decimation_level(0.1, 20.0, 50.0)
            * u32::from(!is_culled(ndc[0], ndc[1], 1.5));
        assert_eq!(level, 0);

        let mut emitted = 0;
        for y in 0..16 {
            for x in 0..16 {
                if survives_decimation(x, y, level) {
                    emitted += 1;
                }
            }
        }
        assert_eq!(emitted, 0);
    }

    #[test]
    fn test_lod_thresholds() {
        assert_eq!(decimation_level(60.0, 20.0, 50.0), 4);
        assert_eq!(decimation_level(35.0, 20.0, 50.0), 2);
        assert_eq!(decimation_level(5.0, 20.0, 50.0), 1);
        // Boundary values fall to the finer side.
        assert_eq!(decimation_level(50.0, 20.0, 50.0), 2);
        assert_eq!(decimation_level(20.0, 20.0, 50.0), 1);
    }

    #[test]
    fn test_global_offsets_follow_projection_sign() {
        let patch = identity_patch();
        let offsets = PatchOffsets {
            n: 2.0,
            t: 3.0,
            b: 4.0,
        };
        // The normal offset rides the +-255 projection sign; the tangent
        // offsets are additive.
        let p = reconstruct_point(&patch, 0, 0, 0.0, offsets);
        assert_eq!(p, [100.0 + 2.0 * 255.0, 4.0, 3.0]);

        let flipped = Patch {
            projection_mode: 1,
            ..patch
        };
        let q = reconstruct_point(&flipped, 0, 0, 0.0, offsets);
        assert_eq!(q[0], 100.0 - 2.0 * 255.0);
    }
}
