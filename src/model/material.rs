//! Base material groups

use super::core::ResourceId;
use crate::error::{Error, Result};
use std::fmt;

/// sRGB color with 8-bit channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha, 255 is opaque
    pub a: u8,
}

impl Color {
    /// Opaque color
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Color with explicit alpha
    pub fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Color from float channels in `0.0..=1.0`; values outside are clamped
    pub fn from_floats(r: f32, g: f32, b: f32, a: f32) -> Self {
        fn channel(v: f32) -> u8 {
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        Self::rgba(channel(r), channel(g), channel(b), channel(a))
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA`
    pub fn from_hex(value: &str) -> Option<Self> {
        let hex = value.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        match hex.len() {
            6 => Some(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::rgb(255, 255, 255)
    }
}

/// Writes `#RRGGBB` for opaque colors and `#RRGGBBAA` otherwise
impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02X}", self.a)?;
        }
        Ok(())
    }
}

/// Individual base material within a base material group
#[derive(Debug, Clone, PartialEq)]
pub struct BaseMaterial {
    /// Material name
    pub name: String,
    /// Display color
    pub display_color: Color,
}

impl BaseMaterial {
    /// Create a new base material
    pub fn new(name: impl Into<String>, display_color: Color) -> Self {
        Self {
            name: name.into(),
            display_color,
        }
    }
}

/// Base material group resource
#[derive(Debug, Clone, PartialEq)]
pub struct BaseMaterialGroup {
    pub(crate) id: ResourceId,
    /// Materials, addressed by their position
    pub materials: Vec<BaseMaterial>,
}

impl BaseMaterialGroup {
    /// Create an empty group
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            materials: Vec::new(),
        }
    }

    /// Resource id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Number of materials
    pub fn count(&self) -> usize {
        self.materials.len()
    }

    /// Indices of all materials in order
    pub fn material_indices(&self) -> std::ops::Range<u32> {
        0..self.materials.len() as u32
    }

    /// Append a material and return its index
    pub fn add_material(&mut self, name: impl Into<String>, color: Color) -> u32 {
        self.materials.push(BaseMaterial::new(name, color));
        (self.materials.len() - 1) as u32
    }

    /// Remove the material at `index`; later indices shift down
    pub fn remove_material(&mut self, index: u32) -> Result<BaseMaterial> {
        self.check(index)?;
        Ok(self.materials.remove(index as usize))
    }

    /// Name of the material at `index`
    pub fn name(&self, index: u32) -> Result<&str> {
        self.check(index)?;
        Ok(&self.materials[index as usize].name)
    }

    /// Rename the material at `index`
    pub fn set_name(&mut self, index: u32, name: impl Into<String>) -> Result<()> {
        self.check(index)?;
        self.materials[index as usize].name = name.into();
        Ok(())
    }

    /// Display color of the material at `index`
    pub fn display_color(&self, index: u32) -> Result<Color> {
        self.check(index)?;
        Ok(self.materials[index as usize].display_color)
    }

    /// Set the display color of the material at `index`
    pub fn set_display_color(&mut self, index: u32, color: Color) -> Result<()> {
        self.check(index)?;
        self.materials[index as usize].display_color = color;
        Ok(())
    }

    /// Set an opaque display color
    pub fn set_display_color_rgb(&mut self, index: u32, r: u8, g: u8, b: u8) -> Result<()> {
        self.set_display_color(index, Color::rgb(r, g, b))
    }

    /// Set the display color from float channels
    pub fn set_display_color_float(
        &mut self,
        index: u32,
        r: f32,
        g: f32,
        b: f32,
        a: f32,
    ) -> Result<()> {
        self.set_display_color(index, Color::from_floats(r, g, b, a))
    }

    fn check(&self, index: u32) -> Result<()> {
        if (index as usize) < self.materials.len() {
            Ok(())
        } else {
            Err(Error::InvalidParam(format!(
                "base material index {} out of range for group {} ({} materials)",
                index,
                self.id,
                self.materials.len()
            )))
        }
    }
}
