//! Particle state layout, emitter and ping-pong slot pairing
//!
//! Each frame slot owns one storage buffer. The compute dispatch for slot `s` reads the
//! buffer of slot `(s - 1) mod N` and writes the buffer of slot `s`, and the particle
//! draw for slot `s` reads that freshly written buffer.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::Rotation3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::foundation::math::Vec3;

/// GPU particle record, matching the compute shader's std430 layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 4],
    pub velocity: [f32; 4],
    pub direction: [f32; 4],
    /// x = remaining lifetime (ms), y = sub-millisecond carry (us), w = initial lifetime
    pub lifetime: [i32; 4],
}

/// Per-frame scalars read by the compute shader (std140)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleFrameUniform {
    pub delta_time: f32,
    pub _pad: [f32; 3],
    pub emitter_origin: [f32; 4],
}

impl ParticleFrameUniform {
    pub fn new(delta_time: f32, emitter_origin: Vec3) -> Self {
        Self {
            delta_time,
            _pad: [0.0; 3],
            emitter_origin: [emitter_origin.x, emitter_origin.y, emitter_origin.z, 1.0],
        }
    }
}

/// Buffer indices used by each frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleSlots {
    count: usize,
}

impl ParticleSlots {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Buffer the dispatch for `slot` reads
    pub fn previous(&self, slot: usize) -> usize {
        (slot + self.count - 1) % self.count
    }

    /// Buffer the dispatch for `slot` writes
    pub fn current(&self, slot: usize) -> usize {
        slot % self.count
    }

    /// Buffer the particle draw for `slot` binds as vertex input
    pub fn draw_buffer(&self, slot: usize) -> usize {
        self.current(slot)
    }
}

/// `local_size_x` of `particle.comp`; the dispatch is sized with the same value
pub const PARTICLE_WORKGROUP_SIZE: u32 = 256;

/// Workgroups needed to cover `particle_count` invocations
pub fn dispatch_group_count(particle_count: u32, workgroup_size: u32) -> u32 {
    particle_count.div_ceil(workgroup_size)
}

/// Seeds the initial particle state around an origin
#[derive(Debug, Clone)]
pub struct ParticleEmitter {
    origin: Vec3,
    /// Full opening angle of the emission cone, radians
    cone_angle: f32,
    spawn_radius: f32,
    max_lifetime: i32,
    min_lifetime: i32,
}

impl ParticleEmitter {
    pub fn new(origin: Vec3) -> Self {
        Self {
            origin,
            cone_angle: std::f32::consts::FRAC_PI_2,
            spawn_radius: 0.01,
            max_lifetime: 30_000,
            min_lifetime: 300,
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Particles seeded from `seed`, or from entropy when `None`
    pub fn spawn(&self, count: u32, seed: Option<u64>) -> Vec<Particle> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        (0..count).map(|_| self.spawn_one(&mut rng)).collect()
    }

    fn spawn_one<R: Rng>(&self, rng: &mut R) -> Particle {
        let offset = loop {
            let candidate = Vec3::new(
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
            );
            if candidate.norm() <= 1.0 {
                break candidate * self.spawn_radius;
            }
        };
        let position = self.origin + offset;

        // Tilt "up" (-Y in Vulkan clip space) by random angles about X and Z
        let half = self.cone_angle * 0.5;
        let about_x = Rotation3::from_axis_angle(&Vec3::x_axis(), half * rng.gen_range(-1.0..=1.0));
        let about_z = Rotation3::from_axis_angle(&Vec3::z_axis(), half * rng.gen_range(-1.0..=1.0));
        let direction = about_z * about_x * Vec3::new(0.0, -1.0, 0.0);

        let ttl = ((rng.gen::<f32>() * self.max_lifetime as f32) as i32).max(self.min_lifetime);

        Particle {
            position: [position.x, position.y, position.z, 1.0],
            velocity: [rng.gen::<f32>() * 0.1, 0.0, 0.0, 0.0],
            direction: [direction.x, direction.y, direction.z, 0.0],
            lifetime: [ttl, 0, 0, ttl],
        }
    }
}

/// Vertex binding for drawing particles straight from a storage buffer
/// CPU twin of the lifetime update in `particle.comp`
///
/// Returns `true` when the particle expired and was reset to its initial lifetime.
#[allow(clippy::cast_possible_truncation)]
pub fn advance_lifetime(lifetime: &mut [i32; 4], delta_time: f32) -> bool {
    let micros = (delta_time * 1_000_000.0).round() as i32 + lifetime[1];
    lifetime[0] -= micros / 1000;
    lifetime[1] = micros % 1000;
    if lifetime[0] <= 0 {
        lifetime[0] = lifetime[3];
        lifetime[1] = 0;
        true
    } else {
        false
    }
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Particle>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// Position at location 0, lifetime at location 1
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 2] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32A32_SINT,
            offset: 48,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::FRAME_SLOT_COUNT;
    use approx::assert_relative_eq;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<Particle>(), 64);
        assert_eq!(std::mem::size_of::<ParticleFrameUniform>(), 32);
        assert_eq!(vertex_attributes()[1].offset as usize, std::mem::offset_of!(Particle, lifetime));
    }

    #[test]
    fn test_dispatch_reads_other_slots_output() {
        let slots = ParticleSlots::new(FRAME_SLOT_COUNT);
        // Which dispatch last wrote each buffer
        let mut written_by: Vec<Option<usize>> = vec![None; slots.count()];
        let mut reads = Vec::new();

        for (dispatch, slot) in [0, 1, 0].into_iter().enumerate() {
            let source = slots.previous(slot);
            let target = slots.current(slot);
            assert_ne!(source, target);
            reads.push(written_by[source]);
            written_by[target] = Some(dispatch);
            assert_eq!(slots.draw_buffer(slot), target);
        }

        // The second slot-0 dispatch sees slot 1's output, not its own earlier result
        assert_eq!(reads[2], Some(1));
        assert_eq!(reads[1], Some(0));
    }

    #[test]
    fn test_group_count_rounds_up() {
        assert_eq!(dispatch_group_count(8192, 256), 32);
        assert_eq!(dispatch_group_count(8193, 256), 33);
        assert_eq!(dispatch_group_count(1, 256), 1);
    }

    #[test]
    fn test_emitter_seeding() {
        let origin = Vec3::new(0.0, -1.5, 0.0);
        let emitter = ParticleEmitter::new(origin);
        let particles = emitter.spawn(512, Some(11));
        assert_eq!(particles, emitter.spawn(512, Some(11)));

        for particle in &particles {
            let p = Vec3::new(particle.position[0], particle.position[1], particle.position[2]);
            assert!((p - origin).norm() <= 0.01 + 1e-6);
            let d = Vec3::new(particle.direction[0], particle.direction[1], particle.direction[2]);
            assert_relative_eq!(d.norm(), 1.0, epsilon = 1e-5);
            assert!(d.y < 0.0);
            assert!(particle.lifetime[0] >= 300 && particle.lifetime[0] <= 30_000);
            assert_eq!(particle.lifetime[0], particle.lifetime[3]);
        }
    }

    #[test]
    fn test_lifetime_drains_above_a_thousand_fps() {
        let mut lifetime = [10, 0, 0, 10];
        for _ in 0..10 {
            assert!(!advance_lifetime(&mut lifetime, 0.0005));
        }
        assert_eq!(lifetime, [5, 0, 0, 10]);

        let mut lifetime = [10, 0, 0, 10];
        advance_lifetime(&mut lifetime, 0.0004);
        advance_lifetime(&mut lifetime, 0.0004);
        assert_eq!(lifetime[0], 10);
        advance_lifetime(&mut lifetime, 0.0004);
        assert_eq!(&lifetime[..2], &[9, 200]);
    }

    #[test]
    fn test_expired_particle_resets_lifetime_and_carry() {
        let mut lifetime = [1, 700, 0, 300];
        assert!(advance_lifetime(&mut lifetime, 0.0005));
        assert_eq!(lifetime, [300, 0, 0, 300]);
    }
}
