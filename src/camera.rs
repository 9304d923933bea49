//! Orbit camera state.
//!
//! The camera is a small state machine: three Euler angles, a distance along
//! the view axis and the viewport/scissor pair matching the current surface.
//! The vertex shader builds the view transform from these values, so nothing
//! here touches the GPU.

use std::f32::consts::{FRAC_PI_2, TAU};

use crate::{
    config::EngineConfig,
    gpu::{Extent2d, Rect2d, Viewport},
};

/// Pitch is kept inside `[-PITCH_LIMIT, PITCH_LIMIT]` to stay clear of gimbal lock.
pub const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.1;

/// Brings an angle into `[-2π, 2π]`.
fn wrap_angle(angle: f32) -> f32 {
    if angle.abs() > TAU { angle % TAU } else { angle }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    yaw: f32,
    pitch: f32,
    roll: f32,
    distance: f32,
    min_distance: f32,
    max_distance: f32,
    viewport: Viewport,
    scissor: Rect2d,
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Camera {
    pub fn new(min_distance: f32, max_distance: f32, initial_distance: f32) -> Self {
        let (min_distance, max_distance) = if min_distance <= max_distance {
            (min_distance, max_distance)
        } else {
            (max_distance, min_distance)
        };
        Self {
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            distance: initial_distance.clamp(min_distance, max_distance),
            min_distance,
            max_distance,
            viewport: Viewport {
                max_depth: 1.0,
                ..Default::default()
            },
            scissor: Rect2d::default(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.min_distance,
            config.max_distance,
            config.initial_distance,
        )
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn roll(&self) -> f32 {
        self.roll
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scissor(&self) -> Rect2d {
        self.scissor
    }

    pub fn rotate_yaw(&mut self, delta: f32) {
        self.set_yaw(self.yaw + delta);
    }

    pub fn rotate_pitch(&mut self, delta: f32) {
        self.set_pitch(self.pitch + delta);
    }

    pub fn rotate_roll(&mut self, delta: f32) {
        self.set_roll(self.roll + delta);
    }

    pub fn set_yaw(&mut self, yaw: f32) {
        if yaw.is_finite() {
            self.yaw = wrap_angle(yaw);
        } else {
            log::warn!("Ignoring non-finite camera yaw {yaw}");
        }
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        if pitch.is_finite() {
            self.pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        } else {
            log::warn!("Ignoring non-finite camera pitch {pitch}");
        }
    }

    pub fn set_roll(&mut self, roll: f32) {
        if roll.is_finite() {
            self.roll = wrap_angle(roll);
        } else {
            log::warn!("Ignoring non-finite camera roll {roll}");
        }
    }

    /// Moves the camera along its forward axis, clamped to the configured range.
    pub fn move_by(&mut self, delta: f32) {
        if delta.is_finite() {
            self.distance = (self.distance + delta).clamp(self.min_distance, self.max_distance);
        }
    }

    /// Resets the viewport and scissor to cover `extent` from the origin.
    pub fn update_viewport(&mut self, extent: Extent2d) {
        self.viewport = Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.scissor = Rect2d {
            x: 0,
            y: 0,
            extent,
        };
    }
}
