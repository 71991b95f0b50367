// Scene data - what gets drawn
//
// One triangle. The "spin" scene orbits a camera around it and tints it with
// an animated light color through a per-frame uniform buffer.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [0.5, 0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [-0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneKind {
    /// Static clip-space triangle
    Triangle,
    /// Orbiting camera with animated light color
    Spin,
}

impl SceneKind {
    /// File stem of the shader pair (`<stem>.vert.spv` / `<stem>.frag.spv`)
    pub fn shader_stem(self) -> &'static str {
        match self {
            SceneKind::Triangle => "triangle",
            SceneKind::Spin => "spin",
        }
    }

    pub fn uses_uniforms(self) -> bool {
        matches!(self, SceneKind::Spin)
    }
}

/// `gl_PointSize` written by both vertex shaders
pub const POINT_SIZE: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTopology {
    TriangleList,
    PointList,
}

impl DrawTopology {
    pub fn toggled(self) -> Self {
        match self {
            DrawTopology::TriangleList => DrawTopology::PointList,
            DrawTopology::PointList => DrawTopology::TriangleList,
        }
    }

    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            DrawTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            DrawTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        }
    }
}

/// Per-frame uniform block, std140 compatible (binding 0, vertex stage)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
    pub light_color: Vec4,
}

const ORBIT_RADIUS: f32 = 2.0;
const ORBIT_DEGREES_PER_SECOND: f32 = 45.0;

impl FrameUniforms {
    /// Uniforms `seconds` after start for a target of size `extent`
    pub fn at(seconds: f32, extent: vk::Extent2D) -> Self {
        let angle = seconds * ORBIT_DEGREES_PER_SECOND.to_radians();
        let eye = Vec3::new(angle.sin() * ORBIT_RADIUS, 0.0, angle.cos() * ORBIT_RADIUS);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);

        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self {
            model: Mat4::IDENTITY,
            view,
            proj,
            light_color: light_color(seconds),
        }
    }
}

fn light_color(seconds: f32) -> Vec4 {
    let wave = |speed: f32, phase_degrees: f32| {
        ((seconds * speed + phase_degrees.to_radians()).sin() + 1.0) / 2.0
    };
    Vec4::new(wave(1.0, 0.0), wave(0.7, 120.0), wave(0.4, 240.0), 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn test_uniform_layout_is_std140_sized() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 3 * 64 + 16);
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
    }

    #[test]
    fn test_light_color_stays_in_unit_range() {
        for step in 0..500 {
            let uniforms = FrameUniforms::at(step as f32 * 0.137, EXTENT);
            let c = uniforms.light_color;
            for component in [c.x, c.y, c.z] {
                assert!((0.0..=1.0).contains(&component), "component {component} at step {step}");
            }
            assert_eq!(c.w, 1.0);
        }
    }

    #[test]
    fn test_light_color_at_start() {
        let c = FrameUniforms::at(0.0, EXTENT).light_color;
        assert_relative_eq!(c.x, 0.5, epsilon = 1e-6);
        assert_relative_eq!(c.y, (120f32.to_radians().sin() + 1.0) / 2.0, epsilon = 1e-6);
        assert_relative_eq!(c.z, (240f32.to_radians().sin() + 1.0) / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_camera_orbits_at_fixed_radius() {
        for seconds in [0.0, 0.5, 1.0, 2.0, 4.0, 7.25] {
            let uniforms = FrameUniforms::at(seconds, EXTENT);
            // The origin sits straight ahead of the eye at the orbit radius
            let origin_in_view = uniforms.view.transform_point3(Vec3::ZERO);
            assert_relative_eq!(origin_in_view.x, 0.0, epsilon = 1e-5);
            assert_relative_eq!(origin_in_view.y, 0.0, epsilon = 1e-5);
            assert_relative_eq!(origin_in_view.z, -ORBIT_RADIUS, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_quarter_orbit_after_two_seconds() {
        // 45 degrees per second: after 2s the eye sits on +X
        let view = FrameUniforms::at(2.0, EXTENT).view;
        let eye = view.inverse().transform_point3(Vec3::ZERO);
        assert_relative_eq!(eye.x, ORBIT_RADIUS, epsilon = 1e-5);
        assert_relative_eq!(eye.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_projection_flips_y_and_tracks_aspect() {
        let wide = FrameUniforms::at(0.0, EXTENT).proj;
        assert!(wide.y_axis.y < 0.0);
        assert_relative_eq!(wide.y_axis.y.abs() / wide.x_axis.x, 800.0 / 600.0, epsilon = 1e-5);

        let degenerate = FrameUniforms::at(0.0, vk::Extent2D { width: 800, height: 0 }).proj;
        assert!(degenerate.x_axis.x.is_finite());
        assert_relative_eq!(degenerate.x_axis.x, degenerate.y_axis.y.abs(), epsilon = 1e-6);
    }

    #[test]
    fn test_topology_toggle() {
        assert_eq!(DrawTopology::TriangleList.toggled(), DrawTopology::PointList);
        assert_eq!(DrawTopology::PointList.toggled().to_vk(), vk::PrimitiveTopology::TRIANGLE_LIST);
    }
}
