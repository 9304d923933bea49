//! Engine configuration.

/// Tunables for an [`crate::engine::Engine`].
///
/// Camera distances are negative: the camera looks down -Z and `distance` is
/// its offset along that axis.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub min_distance: f32,
    pub max_distance: f32,
    pub initial_distance: f32,
    /// Size of the ring of frames that may be in flight at once.
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub vertex_shader: String,
    pub fragment_shader: String,
    /// Capacity of the texture descriptor pool.
    pub max_textures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_distance: -50.0,
            max_distance: -1.0,
            initial_distance: -4.0,
            frames_in_flight: 2,
            clear_color: [0.1, 0.2, 0.3, 1.0],
            vertex_shader: "shaders/model.vert.spv".to_string(),
            fragment_shader: "shaders/model.frag.spv".to_string(),
            max_textures: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_distance_range(mut self, min: f32, max: f32) -> Self {
        self.min_distance = min.min(max);
        self.max_distance = max.max(min);
        self
    }

    pub fn with_initial_distance(mut self, distance: f32) -> Self {
        self.initial_distance = distance;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_shaders(mut self, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.vertex_shader = vertex.into();
        self.fragment_shader = fragment.into();
        self
    }

    pub fn with_max_textures(mut self, max_textures: u32) -> Self {
        self.max_textures = max_textures.max(1);
        self
    }

    /// Ring size actually used by the frame scheduler.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.max(1)
    }
}
