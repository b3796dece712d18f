//! Offline global-illumination lightmap baking.
//!
//! Each static mesh of a [`Level`] gets a square, power-of-two lightmap.
//! Geometry buffers are rasterized into object space, sample positions are
//! biased off nearby backfaces, direct lighting is traced with shadow rays,
//! and indirect lighting is gathered by Monte Carlo over one or more bounces,
//! blurred, composited and dilated. [`LightmapBaker`] runs the pipeline on a
//! background thread with cooperative cancellation.
//!
//! The renderer and the ray-query scene are collaborators behind the
//! [`ObjectSpaceRasterizer`] and [`StaticScene`] traits; [`reference`] holds
//! brute-force CPU implementations of both.

mod allocator;
mod bias;
mod context;
mod denoise;
mod direct;
mod error;
mod events;
mod gbuffer;
mod indirect;
mod light;
mod lightmap_set;
mod map;
mod ray;
pub mod reference;
mod scene;
mod scheduler;

pub use allocator::{LightmapAllocation, allocate_lightmaps, lightmap_resolution};
pub use bias::{PROBE_LENGTH_SCALE, biased_position, correct_positions};
pub use context::{CANCEL_CHECK_INTERVAL, CancellationToken, WorkerContext, texel_stream};
pub use denoise::{
    BLUR_SIGMA, BlurAxis, BlurKernelCache, Compositor, blur_indirect, blur_kernel, blur_pass,
    blur_radius, composite, dilate,
};
pub use direct::{compute_direct, direct_lighting, shadow_visibility};
pub use error::{BakeError, CollaboratorError};
pub use events::{BakeEventHandler, BakeStage, BakeState, BakeStatus, EventSink, NoopHandler};
pub use gbuffer::{
    DIFFUSE_EPSILON, GeometryTargets, ObjectSpaceRasterizer, TargetFormat, bake_geometry_buffers,
    bake_object, downsample, is_valid_diffuse,
};
pub use indirect::{compute_indirect, gather_indirect, hemisphere_direction};
pub use light::{DirectionalLight, Light, PointLight, SpotLight, distance_decay};
pub use lightmap_set::{LightmapSet, save_diffuse_images};
pub use map::{
    DiffuseMap, NormalMap, ObjectMapSet, ObjectSpaceMap, PositionMap, RgbMap, ValidPixelSet,
    pack_rgb10_signed, pack_rgba8, unpack_rgb10_signed, unpack_rgba8,
};
pub use ray::{Intersection, Ray, tangent_frame};
pub use scene::{Aabb, Level, LevelObject, LightmapIds, ObjectId, ObjectKind, StaticScene};
pub use scheduler::LightmapBaker;

pub use nebula_config::LightmapBakingSettings;
