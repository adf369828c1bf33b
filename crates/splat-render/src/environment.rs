use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Converts a packed `0xRRGGBB` color to linear [0, 1] floats.
pub fn rgb_from_hex(rgb: u32) -> Vec3 {
    Vec3::new(
        ((rgb >> 16) & 0xFF) as f32,
        ((rgb >> 8) & 0xFF) as f32,
        (rgb & 0xFF) as f32,
    ) / 255.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentPreset {
    #[default]
    Sunset,
    Dawn,
    Night,
    Studio,
}

struct SkyPalette {
    zenith: u32,
    horizon: u32,
    ground: u32,
}

impl EnvironmentPreset {
    fn palette(self) -> SkyPalette {
        match self {
            EnvironmentPreset::Sunset => SkyPalette {
                zenith: 0x2b3a67,
                horizon: 0xf28c4b,
                ground: 0x3a2a25,
            },
            EnvironmentPreset::Dawn => SkyPalette {
                zenith: 0x6d8fc7,
                horizon: 0xf6c9a8,
                ground: 0x4b4a48,
            },
            EnvironmentPreset::Night => SkyPalette {
                zenith: 0x05070f,
                horizon: 0x1c2541,
                ground: 0x0b0c10,
            },
            EnvironmentPreset::Studio => SkyPalette {
                zenith: 0xd8d8d8,
                horizon: 0xa6a6a6,
                ground: 0x5c5c5c,
            },
        }
    }

    /// Sky color seen along the unit direction `dir`.
    pub fn sample(self, dir: Vec3) -> Vec3 {
        let palette = self.palette();
        let horizon = rgb_from_hex(palette.horizon);
        let y = dir.y.clamp(-1.0, 1.0);
        if y >= 0.0 {
            horizon.lerp(rgb_from_hex(palette.zenith), y.sqrt())
        } else {
            horizon.lerp(rgb_from_hex(palette.ground), (-y).sqrt())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Background {
    /// Solid clear color, linear RGB.
    Color([f32; 3]),
    /// The preset's sky gradient, sampled per view ray.
    Skybox,
}

/// Backdrop of the scene. Drawn before any splat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub preset: EnvironmentPreset,
    pub background: Background,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            preset: EnvironmentPreset::Sunset,
            background: Background::Color(rgb_from_hex(0x1a1a1a).to_array()),
        }
    }
}

impl Environment {
    /// Background color along `dir`, or `None` when the direction does not matter.
    pub fn uniform_color(&self) -> Option<Vec3> {
        match self.background {
            Background::Color(rgb) => Some(Vec3::from_array(rgb)),
            Background::Skybox => None,
        }
    }

    pub fn sample(&self, dir: Vec3) -> Vec3 {
        match self.background {
            Background::Color(rgb) => Vec3::from_array(rgb),
            Background::Skybox => self.preset.sample(dir),
        }
    }
}
