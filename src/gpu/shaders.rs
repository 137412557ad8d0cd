//! Compute shader sources
//!
//! One shader family per concern, specialized textually: a line beginning
//! with a toggle marker stays a comment until `specialize` strips the
//! marker. This keeps a single maintained source for the fixed/dynamic
//! decimation and shadow variants.
//!
//! The build shader's image/buffer bindings 0..3 (position, canvas,
//! shadow, counter) are declared explicitly and the builder constructs its
//! bind groups in that exact order; the coupling is load-bearing.

/// Enables the per-block decimation texture path.
pub const TOGGLE_DYNAMIC: &str = "//@dynamic";
/// Enables the global decimation uniform path.
pub const TOGGLE_FIXED: &str = "//@fixed";
/// Enables the shadow-map splat output.
pub const TOGGLE_SHADOW: &str = "//@shadow";

/// Workgroup edge of the build and clear passes.
pub const WORKGROUP_SIZE: u32 = 16;

/// Strips the given toggle markers, turning their lines into live code.
/// Unlisted markers leave their lines commented out.
pub fn specialize(source: &str, enabled: &[&str]) -> String {
    let mut specialized = source.to_string();
    for marker in enabled {
        specialized = specialized.replace(marker, "");
    }
    specialized
}

/// Unprojects occupancy-masked atlas pixels into packed position/color
/// images and counts the emitted vertices. Exactly one of
/// [`TOGGLE_DYNAMIC`] / [`TOGGLE_FIXED`] must be enabled;
/// [`TOGGLE_SHADOW`] additionally emits one black splat per point onto
/// the ground plane.
pub const MODEL_BUILDER_SHADER: &str = r#"
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
    pad0: f32,
    pad1: f32,
    pad2: f32,
}

@group(0) @binding(0) var pos_img: texture_storage_2d<rgba32float, write>;
@group(0) @binding(1) var col_img: texture_storage_2d<rgba32float, write>;
//@shadow @group(0) @binding(2) var shadow_img: texture_storage_2d<rgba32float, write>;
@group(0) @binding(3) var<storage, read_write> num_vertex: atomic<u32>;

@group(1) @binding(0) var tex_col: texture_2d<f32>;
@group(1) @binding(1) var tex_geo: texture_2d<f32>;
@group(1) @binding(2) var tex_ocm: texture_2d<f32>;
@group(1) @binding(3) var tex_uv0uv1: texture_2d<f32>;
@group(1) @binding(4) var tex_d1nop: texture_2d<f32>;
//@dynamic @group(1) @binding(5) var tex_dec: texture_2d<u32>;
@group(1) @binding(6) var<uniform> params: BuilderParams;

const ROT_IDENTITY = mat3x3<f32>(
    vec3<f32>(1.0, 0.0, 0.0),
    vec3<f32>(0.0, 1.0, 0.0),
    vec3<f32>(0.0, 0.0, 1.0),
);
const ROT_SWAP_XY = mat3x3<f32>(
    vec3<f32>(0.0, 1.0, 0.0),
    vec3<f32>(1.0, 0.0, 0.0),
    vec3<f32>(0.0, 0.0, 1.0),
);
const ROT_SWAP_XZ = mat3x3<f32>(
    vec3<f32>(0.0, 0.0, 1.0),
    vec3<f32>(0.0, 1.0, 0.0),
    vec3<f32>(1.0, 0.0, 0.0),
);

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let id = gid.xy;
    // The dispatch over-covers the atlas by one workgroup per axis.
    if (id.x >= params.width || id.y >= params.height) {
        return;
    }

    // Atlas planes are addressed bottom-up.
    let pixel = vec2<i32>(i32(id.x), i32(params.height - 1u - id.y));

    let block = vec2<i32>(i32(id.x / 16u), i32(id.y / 16u));
    //@dynamic let decimation_level = textureLoad(tex_dec, block, 0).x;
    //@fixed let decimation_level = params.decimation_level;

    // A culled block (level 0) contributes nothing.
    if (decimation_level == 0u) {
        return;
    }

    // x255 so 8-bit and 10-bit occupancy planes behave alike.
    let ocm = textureLoad(tex_ocm, pixel, 0) * 255.0;
    let is_point = ocm.r > 0.5
        && id.x % decimation_level == 0u
        && id.y % decimation_level == 0u;
    if (!is_point) {
        return;
    }

    let col = textureLoad(tex_col, pixel, 0);
    let geo = textureLoad(tex_geo, pixel, 0);

    let u0v0_u1v1 = textureLoad(tex_uv0uv1, block, 0);
    let d1_norm_orient_proj = textureLoad(tex_d1nop, block, 0);

    let u0 = u32(u0v0_u1v1.x);
    let v0 = u32(u0v0_u1v1.y);
    let u1 = u0v0_u1v1.z;
    let v1 = u0v0_u1v1.w;
    let d1 = d1_norm_orient_proj.x;
    let normal = u32(d1_norm_orient_proj.y);
    let orient = u32(d1_norm_orient_proj.z);
    let proj_mode = i32(d1_norm_orient_proj.w);

    let switch_mat = f32(normal == 0u) * ROT_IDENTITY
        + f32(normal == 1u) * ROT_SWAP_XY
        + f32(normal == 2u) * ROT_SWAP_XZ;

    let proj = 255 * (1 - 2 * proj_mode);

    // u0/v0 are in block units; id is in atlas pixels.
    var origin: array<f32, 2>;
    origin[0] = f32(id.x - u0 * 16u);
    origin[1] = f32(id.y - v0 * 16u);
    let t = origin[orient] + u1;
    let b = origin[1u - orient] + v1;

    let n0 = d1 + geo.r * f32(proj);
    let pos = switch_mat
        * vec3<f32>(n0 + params.n_off * f32(proj), b + params.b_off, t + params.t_off);
    let pos_col = vec4<f32>(pos * params.norm_res_factor, f32(decimation_level));

    let update_num_vert = atomicAdd(&num_vertex, params.vert_incr);
    let atomic_lid = update_num_vert / params.vert_incr;
    let atomic_id = vec2<i32>(i32(atomic_lid % params.width), i32(atomic_lid / params.width));
    textureStore(pos_img, atomic_id, pos_col);
    textureStore(col_img, atomic_id, vec4<f32>(col.rgb, 1.0));
    //@shadow textureStore(shadow_img, vec2<i32>(pos.xz * params.shadow_res_factor), vec4<f32>(0.0, 0.0, 0.0, 1.0));
}
"#;

/// Chooses a per-block decimation level from the projected distance
/// between two neighbouring reconstructed points, then culls blocks whose
/// centre lands outside the widened viewport. One invocation per 16x16
/// atlas block.
pub const DECIMATION_SHADER: &str = r#"
struct DecimationParams {
    mvp: mat4x4<f32>,
    block_w: u32,
    block_h: u32,
    r1: f32,
    r2: f32,
    vp_cull_factor: f32,
    norm_res_factor: f32,
    pad0: f32,
    pad1: f32,
}

@group(0) @binding(0) var dec_img: texture_storage_2d<rgba8uint, write>;

@group(1) @binding(0) var tex_geo: texture_2d<f32>;
@group(1) @binding(1) var tex_uv0uv1: texture_2d<f32>;
@group(1) @binding(2) var tex_d1nop: texture_2d<f32>;
@group(1) @binding(3) var<uniform> params: DecimationParams;

const ROT_IDENTITY = mat3x3<f32>(
    vec3<f32>(1.0, 0.0, 0.0),
    vec3<f32>(0.0, 1.0, 0.0),
    vec3<f32>(0.0, 0.0, 1.0),
);
const ROT_SWAP_XY = mat3x3<f32>(
    vec3<f32>(0.0, 1.0, 0.0),
    vec3<f32>(1.0, 0.0, 0.0),
    vec3<f32>(0.0, 0.0, 1.0),
);
const ROT_SWAP_XZ = mat3x3<f32>(
    vec3<f32>(0.0, 0.0, 1.0),
    vec3<f32>(0.0, 1.0, 0.0),
    vec3<f32>(1.0, 0.0, 0.0),
);

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let id = gid.xy;
    if (id.x >= params.block_w || id.y >= params.block_h) {
        return;
    }

    // Geometry sampled at the block centre, bottom-up like the build pass.
    let geo_height = i32(params.block_h * 16u);
    let centre = vec2<i32>(
        i32(id.x * 16u + 8u),
        geo_height - 1 - i32(id.y * 16u + 8u),
    );
    let geo = textureLoad(tex_geo, centre, 0);

    let block = vec2<i32>(i32(id.x), i32(id.y));
    let u0v0_u1v1 = textureLoad(tex_uv0uv1, block, 0);
    let d1_norm_orient_proj = textureLoad(tex_d1nop, block, 0);

    let u0 = u32(u0v0_u1v1.x);
    let v0 = u32(u0v0_u1v1.y);
    let u1 = u0v0_u1v1.z;
    let v1 = u0v0_u1v1.w;
    let d1 = d1_norm_orient_proj.x;
    let normal = u32(d1_norm_orient_proj.y);
    let orient = u32(d1_norm_orient_proj.z);
    let proj_mode = i32(d1_norm_orient_proj.w);

    let switch_mat = f32(normal == 0u) * ROT_IDENTITY
        + f32(normal == 1u) * ROT_SWAP_XY
        + f32(normal == 2u) * ROT_SWAP_XZ;

    let proj = 255 * (1 - 2 * proj_mode);

    // id, u0 and v0 are all in block units here.
    var origin: array<f32, 2>;
    origin[0] = f32((id.x - u0) * 16u);
    origin[1] = f32((id.y - v0) * 16u);
    let t = origin[orient] + u1;
    let b = origin[1u - orient] + v1;

    let n0 = d1 + geo.r * f32(proj);
    let pos = (switch_mat * vec3<f32>(n0, b, t)) * params.norm_res_factor;
    let pos1 = (switch_mat * vec3<f32>(n0, b + 1.0, t + 1.0)) * params.norm_res_factor;

    let p_pos = params.mvp * vec4<f32>(pos, 1.0);
    let p_pos1 = params.mvp * vec4<f32>(pos1, 1.0);
    let n_pos = p_pos / p_pos.w;
    let n_pos1 = p_pos1 / p_pos1.w;
    let dist = length(n_pos.xyz - n_pos1.xyz);

    var dec = select(select(1u, 2u, dist > params.r1), 4u, dist > params.r2);
    // Keep a margin of off-screen blocks alive to avoid popping.
    dec = dec
        * u32(abs(n_pos.x) < params.vp_cull_factor && abs(n_pos.y) < params.vp_cull_factor);

    textureStore(dec_img, block, vec4<u32>(dec, 0u, 0u, 0u));
}
"#;

/// Clears a writable image to transparent black. `textureStore` outside
/// the image bounds is a no-op, so the dispatch may over-cover.
pub const CLEAR_IMAGE_SHADER: &str = r#"
@group(0) @binding(0) var img: texture_storage_2d<rgba32float, write>;

const CLEAR_COLOR = vec4<f32>(0.0, 0.0, 0.0, 0.0);

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    textureStore(img, vec2<i32>(gid.xy), CLEAR_COLOR);
}
"#;
