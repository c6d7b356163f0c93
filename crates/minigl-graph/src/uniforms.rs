//! Uniform values, uniform blocks and the per-tick global set.

/// Global uniform names, as seen by shaders.
pub const U_TIME: &str = "uTime";
pub const U_DELTA_TIME: &str = "uDeltaTime";
pub const U_FRAME: &str = "uFrame";
pub const U_RESOLUTION: &str = "uResolution";
pub const U_PIXEL_SIZE: &str = "uPixelSize";
pub const U_ASPECT: &str = "uAspect";
pub const U_MOUSE: &str = "uMouse";
pub const U_MOUSE_DOWN: &str = "uMouseDown";
pub const U_MOUSE_VELOCITY: &str = "uMouseVelocity";

/// A non-texture uniform. Texture uniforms are expressed as input edges instead.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "type", content = "value", rename_all = "snake_case")
)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl UniformValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "float",
            UniformValue::Int(_) => "int",
            UniformValue::Bool(_) => "bool",
            UniformValue::Vec2(_) => "vec2",
            UniformValue::Vec3(_) => "vec3",
            UniformValue::Vec4(_) => "vec4",
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v)
    }
}

/// Named uniform values handed to a backend with one binding set.
///
/// Insertion order is kept; setting an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformBlock {
    entries: Vec<(String, UniformValue)>,
}

impl UniformBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: UniformValue) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pointer state reported by the host, in surface pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerState {
    pub position: [f32; 2],
    pub down: bool,
}

/// Uniforms every node sees, recomputed once per tick and read-only to nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalUniforms {
    pub time: f32,
    pub delta_time: f32,
    pub frame: u64,
    pub resolution: [f32; 2],
    pub pixel_size: [f32; 2],
    pub aspect: f32,
    pub mouse: [f32; 2],
    pub mouse_down: bool,
    /// Pointer displacement per second between the last two ticks.
    pub mouse_velocity: [f32; 2],
}

impl GlobalUniforms {
    /// Advance to a new tick. The first tick has zero delta and zero velocity.
    pub fn advance(&mut self, time: f32, frame: u64, surface: (u32, u32), pointer: PointerState) {
        let first = self.frame == 0;
        let dt = if first { 0.0 } else { (time - self.time).max(0.0) };

        self.mouse_velocity = if dt > 0.0 {
            [
                (pointer.position[0] - self.mouse[0]) / dt,
                (pointer.position[1] - self.mouse[1]) / dt,
            ]
        } else {
            [0.0, 0.0]
        };

        let (w, h) = (surface.0.max(1) as f32, surface.1.max(1) as f32);
        self.time = time;
        self.delta_time = dt;
        self.frame = frame;
        self.resolution = [w, h];
        self.pixel_size = [1.0 / w, 1.0 / h];
        self.aspect = w / h;
        self.mouse = pointer.position;
        self.mouse_down = pointer.down;
    }

    pub fn to_block(&self) -> UniformBlock {
        let mut block = UniformBlock::new();
        block.set(U_TIME, UniformValue::Float(self.time));
        block.set(U_DELTA_TIME, UniformValue::Float(self.delta_time));
        // GLSL has no 64-bit ints; wrap rather than saturate so shaders see motion.
        block.set(U_FRAME, UniformValue::Int(self.frame as i32));
        block.set(U_RESOLUTION, UniformValue::Vec2(self.resolution));
        block.set(U_PIXEL_SIZE, UniformValue::Vec2(self.pixel_size));
        block.set(U_ASPECT, UniformValue::Float(self.aspect));
        block.set(U_MOUSE, UniformValue::Vec2(self.mouse));
        block.set(U_MOUSE_DOWN, UniformValue::Bool(self.mouse_down));
        block.set(U_MOUSE_VELOCITY, UniformValue::Vec2(self.mouse_velocity));
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_set_replaces_in_place() {
        let mut b = UniformBlock::new();
        b.set("a", UniformValue::Float(1.0));
        b.set("b", true.into());
        b.set("a", UniformValue::Float(2.0));
        assert_eq!(b.len(), 2);
        assert_eq!(b.get("a"), Some(UniformValue::Float(2.0)));
        let names: Vec<&str> = b.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn first_tick_has_no_velocity() {
        let mut g = GlobalUniforms::default();
        let p = PointerState {
            position: [10.0, 20.0],
            down: true,
        };
        g.advance(0.5, 1, (200, 100), p);
        assert_eq!(g.delta_time, 0.0);
        assert_eq!(g.mouse_velocity, [0.0, 0.0]);
        assert_eq!(g.aspect, 2.0);
        assert_eq!(g.pixel_size, [1.0 / 200.0, 1.0 / 100.0]);
        assert!(g.mouse_down);
    }

    #[test]
    fn velocity_is_delta_per_second() {
        let mut g = GlobalUniforms::default();
        g.advance(1.0, 1, (64, 64), PointerState::default());
        let p = PointerState {
            position: [5.0, -2.0],
            down: false,
        };
        g.advance(1.5, 2, (64, 64), p);
        assert_eq!(g.delta_time, 0.5);
        assert_eq!(g.mouse_velocity, [10.0, -4.0]);
    }

    #[test]
    fn block_exposes_every_global() {
        let mut g = GlobalUniforms::default();
        g.advance(2.0, 3, (32, 16), PointerState::default());
        let b = g.to_block();
        for name in [
            U_TIME,
            U_DELTA_TIME,
            U_FRAME,
            U_RESOLUTION,
            U_PIXEL_SIZE,
            U_ASPECT,
            U_MOUSE,
            U_MOUSE_DOWN,
            U_MOUSE_VELOCITY,
        ] {
            assert!(b.get(name).is_some(), "missing {name}");
        }
        assert_eq!(b.get(U_FRAME), Some(UniformValue::Int(3)));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn values_serialize_as_tagged_json() {
        let json = serde_json::to_value(UniformValue::Vec2([0.5, 1.0])).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "vec2", "value": [0.5, 1.0] }));

        let back: UniformValue =
            serde_json::from_str(r#"{ "type": "bool", "value": true }"#).unwrap();
        assert_eq!(back, UniformValue::Bool(true));

        let err = serde_json::from_str::<UniformValue>(r#"{ "type": "mat4", "value": [] }"#);
        assert!(err.is_err(), "unknown uniform types are rejected");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn program_json_defaults_label_and_vertex() {
        let p: crate::shader::ShaderProgram =
            serde_json::from_str(r#"{ "fragment": "void main() {}" }"#).unwrap();
        assert_eq!(p.fragment, "void main() {}");
        assert!(p.label.is_none() && p.vertex.is_none());
    }
}
