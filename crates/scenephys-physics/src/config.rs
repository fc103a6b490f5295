//! Physics configuration.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default rigidbody mass in kg.
pub const DEFAULT_MASS: f32 = 1.0;
/// Default linear damping.
pub const DEFAULT_LINEAR_DAMPING: f32 = 0.01;
/// Default angular damping.
pub const DEFAULT_ANGULAR_DAMPING: f32 = 0.05;
/// Default sleep speed threshold.
pub const DEFAULT_SLEEP_SPEED_THRESHOLD: f32 = 0.2;
/// Default seconds below the sleep threshold before sleeping.
pub const DEFAULT_SLEEP_TIME_LIMIT: f32 = 1.0;

/// Scalar configuration of a rigidbody.
///
/// This is everything a rigidbody carries besides its engine state, and exactly what
/// survives a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidbodySettings {
    /// Mass in kg. Zero makes the body kinematic.
    pub mass: f32,
    /// Driven externally instead of by forces. Forces mass to zero.
    pub is_kinematic: bool,
    /// Initial linear velocity.
    pub velocity: Vector3<f32>,
    /// Initial angular velocity.
    pub angular_velocity: Vector3<f32>,
    /// Linear velocity damping.
    pub linear_damping: f32,
    /// Angular velocity damping.
    pub angular_damping: f32,
    /// Speed below which the body may fall asleep.
    pub sleep_speed_threshold: f32,
    /// Seconds below the threshold before the body falls asleep.
    pub sleep_time_limit: f32,
    /// Carry the live velocity over when the body is rebuilt.
    ///
    /// When false, the cached velocity is only pushed into the very first body.
    pub preserve_velocity_on_rebuild: bool,
}

impl Default for RigidbodySettings {
    fn default() -> Self {
        Self {
            mass: DEFAULT_MASS,
            is_kinematic: false,
            velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            linear_damping: DEFAULT_LINEAR_DAMPING,
            angular_damping: DEFAULT_ANGULAR_DAMPING,
            sleep_speed_threshold: DEFAULT_SLEEP_SPEED_THRESHOLD,
            sleep_time_limit: DEFAULT_SLEEP_TIME_LIMIT,
            preserve_velocity_on_rebuild: false,
        }
    }
}

/// World-level physics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Gravity acceleration.
    pub gravity: Vector3<f32>,
    /// Fixed step length in seconds.
    pub timestep: f32,
    /// Defaults for rigidbodies created with [`crate::PhysicsSystem::add_default_rigidbody`].
    pub rigidbody: RigidbodySettings,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vector3::new(0.0, -9.81, 0.0),
            timestep: 1.0 / 60.0,
            rigidbody: RigidbodySettings::default(),
        }
    }
}

impl PhysicsConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}
