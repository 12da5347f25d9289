//! Adjustable scene lighting
//!
//! Ambient light always contributes. At most one of the directional light or
//! the spotlight is drawn on top, chosen by [`LightMode`]. Parameters of the
//! unselected light are kept so switching back restores them.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

pub const INTENSITY_RANGE: (f32, f32) = (0.0, 2.0);
pub const POSITION_RANGE: (f32, f32) = (-10.0, 10.0);
pub const SPOT_ANGLE_RANGE: (f32, f32) = (0.1, FRAC_PI_2);

/// Clamp into `range`, keeping `current` for NaN or infinite input
fn clamp_or_keep(value: f32, range: (f32, f32), current: f32) -> f32 {
    if value.is_finite() {
        value.clamp(range.0, range.1)
    } else {
        current
    }
}

fn clamp_position(position: [f32; 3], current: [f32; 3]) -> [f32; 3] {
    [
        clamp_or_keep(position[0], POSITION_RANGE, current[0]),
        clamp_or_keep(position[1], POSITION_RANGE, current[1]),
        clamp_or_keep(position[2], POSITION_RANGE, current[2]),
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    /// Ambient only
    #[default]
    None,
    Directional,
    Spotlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmbientLight {
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    pub position: [f32; 3],
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotLight {
    pub position: [f32; 3],
    pub intensity: f32,
    /// Cone half-angle in radians
    pub angle: f32,
}

/// A light the renderer should draw
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActiveLight {
    Ambient(AmbientLight),
    Directional(DirectionalLight),
    Spot(SpotLight),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfiguration {
    ambient: AmbientLight,
    directional: DirectionalLight,
    spot: SpotLight,
    mode: LightMode,
}

impl Default for LightingConfiguration {
    fn default() -> Self {
        Self {
            ambient: AmbientLight { intensity: 0.2 },
            directional: DirectionalLight {
                position: [5.0, 5.0, 5.0],
                intensity: 1.0,
            },
            spot: SpotLight {
                position: [0.0, 5.0, 0.0],
                intensity: 1.0,
                angle: 0.15,
            },
            mode: LightMode::None,
        }
    }
}

impl LightingConfiguration {
    /// Pull every field back into range; used for values deserialized from
    /// config, which bypass the setters
    pub fn sanitized(self) -> Self {
        let mut config = Self::default();
        config.set_ambient(self.ambient.intensity);
        config.set_directional(self.directional.position, self.directional.intensity);
        config.set_spot(self.spot.position, self.spot.intensity, self.spot.angle);
        config.set_mode(self.mode);
        config
    }

    pub fn ambient(&self) -> AmbientLight {
        self.ambient
    }

    pub fn directional(&self) -> DirectionalLight {
        self.directional
    }

    pub fn spot(&self) -> SpotLight {
        self.spot
    }

    pub fn mode(&self) -> LightMode {
        self.mode
    }

    pub fn set_ambient(&mut self, intensity: f32) {
        self.ambient.intensity = clamp_or_keep(intensity, INTENSITY_RANGE, self.ambient.intensity);
    }

    pub fn set_directional(&mut self, position: [f32; 3], intensity: f32) {
        self.directional.position = clamp_position(position, self.directional.position);
        self.directional.intensity =
            clamp_or_keep(intensity, INTENSITY_RANGE, self.directional.intensity);
    }

    pub fn set_spot(&mut self, position: [f32; 3], intensity: f32, angle: f32) {
        self.spot.position = clamp_position(position, self.spot.position);
        self.spot.intensity = clamp_or_keep(intensity, INTENSITY_RANGE, self.spot.intensity);
        self.spot.angle = clamp_or_keep(angle, SPOT_ANGLE_RANGE, self.spot.angle);
    }

    pub fn set_mode(&mut self, mode: LightMode) {
        self.mode = mode;
    }

    /// Lights to render, ambient first
    pub fn active_lights(&self) -> Vec<ActiveLight> {
        let mut lights = vec![ActiveLight::Ambient(self.ambient)];
        match self.mode {
            LightMode::None => {}
            LightMode::Directional => lights.push(ActiveLight::Directional(self.directional)),
            LightMode::Spotlight => lights.push(ActiveLight::Spot(self.spot)),
        }
        lights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_clamp() {
        let mut lighting = LightingConfiguration::default();
        lighting.set_ambient(5.0);
        assert_eq!(lighting.ambient().intensity, 2.0);

        lighting.set_spot([0.0, 5.0, 0.0], 1.0, 10.0);
        assert_eq!(lighting.spot().angle, FRAC_PI_2);

        lighting.set_spot([0.0, 5.0, 0.0], 1.0, 0.0);
        assert_eq!(lighting.spot().angle, 0.1);

        lighting.set_directional([-20.0, 3.0, 11.0], -1.0);
        assert_eq!(lighting.directional().position, [-10.0, 3.0, 10.0]);
        assert_eq!(lighting.directional().intensity, 0.0);
    }

    #[test]
    fn test_non_finite_input_keeps_value() {
        let mut lighting = LightingConfiguration::default();
        lighting.set_ambient(f32::NAN);
        assert_eq!(lighting.ambient().intensity, 0.2);
        lighting.set_directional([f32::INFINITY, 1.0, 2.0], 1.5);
        assert_eq!(lighting.directional().position, [5.0, 1.0, 2.0]);
        assert_eq!(lighting.directional().intensity, 1.5);
    }

    #[test]
    fn test_mode_switch_preserves_parameters() {
        let mut lighting = LightingConfiguration::default();
        lighting.set_mode(LightMode::Directional);
        lighting.set_directional([1.0, 2.0, 3.0], 0.5);
        lighting.set_mode(LightMode::Spotlight);
        lighting.set_spot([0.0, 1.0, 0.0], 1.2, 0.3);
        lighting.set_mode(LightMode::Directional);

        assert_eq!(
            lighting.active_lights(),
            vec![
                ActiveLight::Ambient(AmbientLight { intensity: 0.2 }),
                ActiveLight::Directional(DirectionalLight {
                    position: [1.0, 2.0, 3.0],
                    intensity: 0.5,
                }),
            ]
        );
        assert_eq!(lighting.spot().angle, 0.3);
    }

    #[test]
    fn test_ambient_only_by_default() {
        let lighting = LightingConfiguration::default();
        assert_eq!(lighting.active_lights().len(), 1);
    }

    #[test]
    fn test_sanitized_config_values() {
        let raw: LightingConfiguration = serde_json::from_str(
            r#"{"ambient": {"intensity": 9.0}, "mode": "spotlight",
                "spot": {"position": [0.0, 50.0, 0.0], "intensity": 1.0, "angle": 3.0}}"#,
        )
        .unwrap();
        let lighting = raw.sanitized();
        assert_eq!(lighting.ambient().intensity, 2.0);
        assert_eq!(lighting.spot().position, [0.0, 10.0, 0.0]);
        assert_eq!(lighting.spot().angle, FRAC_PI_2);
        assert_eq!(lighting.mode(), LightMode::Spotlight);
        assert_eq!(lighting.directional(), LightingConfiguration::default().directional());
    }
}
