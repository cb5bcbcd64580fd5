//! Procedural meshes
//!
//! Triangles wind counter-clockwise when seen from the side their normal points to.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::offset_of;

/// Vertex layout shared by the geometry and lighting pipelines
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// Indexed triangle list
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Quad from four corners in counter-clockwise order around `normal`
    fn push_quad(&mut self, corners: [[f32; 3]; 4], normal: [f32; 3]) {
        let base = self.vertices.len() as u32;
        let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];
        for (position, uv) in corners.into_iter().zip(uvs) {
            self.vertices.push(Vertex { position, normal, uv });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    /// Axis-aligned cube centred on the origin
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        let mut mesh = Self::default();
        // +X, -X, +Y, -Y, +Z, -Z
        mesh.push_quad([[h, -h, h], [h, -h, -h], [h, h, -h], [h, h, h]], [1.0, 0.0, 0.0]);
        mesh.push_quad([[-h, -h, -h], [-h, -h, h], [-h, h, h], [-h, h, -h]], [-1.0, 0.0, 0.0]);
        mesh.push_quad([[-h, h, h], [h, h, h], [h, h, -h], [-h, h, -h]], [0.0, 1.0, 0.0]);
        mesh.push_quad([[-h, -h, -h], [h, -h, -h], [h, -h, h], [-h, -h, h]], [0.0, -1.0, 0.0]);
        mesh.push_quad([[-h, -h, h], [h, -h, h], [h, h, h], [-h, h, h]], [0.0, 0.0, 1.0]);
        mesh.push_quad([[h, -h, -h], [-h, -h, -h], [-h, h, -h], [h, h, -h]], [0.0, 0.0, -1.0]);
        mesh
    }

    /// Square in the XZ plane facing +Y
    pub fn plane(size: f32) -> Self {
        let h = size * 0.5;
        let mut mesh = Self::default();
        mesh.push_quad([[-h, 0.0, h], [h, 0.0, h], [h, 0.0, -h], [-h, 0.0, -h]], [0.0, 1.0, 0.0]);
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    fn assert_outward_winding(mesh: &Mesh) {
        for triangle in mesh.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| {
                let p = mesh.vertices[triangle[i] as usize].position;
                Vec3::new(p[0], p[1], p[2])
            });
            let n = mesh.vertices[triangle[0] as usize].normal;
            let face = (b - a).cross(&(c - a));
            assert!(face.dot(&Vec3::new(n[0], n[1], n[2])) > 0.0);
        }
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(Vertex::attributes()[2].offset, 24);
    }

    #[test]
    fn test_cube_counts_and_winding() {
        let cube = Mesh::cube(2.0);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_outward_winding(&cube);
    }

    #[test]
    fn test_plane_faces_up() {
        let plane = Mesh::plane(10.0);
        assert_eq!(plane.indices.len(), 6);
        assert_outward_winding(&plane);
    }
}
