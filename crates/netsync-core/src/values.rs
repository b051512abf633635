//! Conversions between typed values and the string form carried by variables
//! and RPC arguments.
//!
//! Parsing is best effort: malformed input is logged and reported as `None`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Parse `raw` as `T`, logging a warning tagged with `name` on failure.
pub fn parse_value<T>(name: &str, raw: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(name, raw, error = %e, "Ignoring malformed value");
            None
        }
    }
}

/// Parse a boolean flag (`true`/`false`/`1`/`0`, case-insensitive).
pub fn parse_flag(name: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => {
            tracing::warn!(name, raw, "Ignoring malformed flag");
            None
        }
    }
}

/// Canonical text for a float: shortest representation that parses back exactly.
pub fn format_float(value: f32) -> String {
    value.to_string()
}

/// RGBA color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Rgba = Rgba::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Rgba = Rgba::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Rgba = Rgba::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Build from three or four component strings (alpha defaults to 1).
    pub fn from_components(name: &str, parts: &[String]) -> Option<Self> {
        if !(3..=4).contains(&parts.len()) {
            tracing::warn!(name, count = parts.len(), "Color needs 3 or 4 components");
            return None;
        }
        let r = parse_value::<f32>(name, &parts[0])?;
        let g = parse_value::<f32>(name, &parts[1])?;
        let b = parse_value::<f32>(name, &parts[2])?;
        let a = match parts.get(3) {
            Some(raw) => parse_value::<f32>(name, raw)?,
            None => 1.0,
        };
        Some(Self::new(r, g, b, a).clamped())
    }

    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.r, self.g, self.b, self.a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRgbaError(String);

impl fmt::Display for ParseRgbaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid color '{}': expected r,g,b[,a]", self.0)
    }
}

impl FromStr for Rgba {
    type Err = ParseRgbaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f32> = s
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .map_err(|_| ParseRgbaError(s.to_string()))?;

        match parts.as_slice() {
            [r, g, b] => Ok(Rgba::rgb(*r, *g, *b).clamped()),
            [r, g, b, a] => Ok(Rgba::new(*r, *g, *b, *a).clamped()),
            _ => Err(ParseRgbaError(s.to_string())),
        }
    }
}
