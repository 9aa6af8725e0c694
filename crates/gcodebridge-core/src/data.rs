//! Machine coordinate types
//!
//! GRBL reports positions for up to six axes. Status reports carry them as
//! comma separated floats, which the firmware parser turns into [`CNCPoint`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine coordinate units (millimeters or inches)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    /// Millimeters (metric)
    MM,
    /// Inches (imperial)
    INCH,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::MM => write!(f, "mm"),
            Units::INCH => write!(f, "in"),
        }
    }
}

/// A 6-axis machine coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CNCPoint {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
    /// A-axis (4th axis) position
    pub a: f64,
    /// B-axis (5th axis) position
    pub b: f64,
    /// C-axis (6th axis) position
    pub c: f64,
    /// Coordinate unit
    pub unit: Units,
}

impl CNCPoint {
    /// Create a new point with all axes at zero
    pub fn new(unit: Units) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            a: 0.0,
            b: 0.0,
            c: 0.0,
            unit,
        }
    }

    /// Create a point from a list of axis values in X, Y, Z, A, B, C order.
    ///
    /// Missing trailing axes are zero; extra values are ignored.
    pub fn from_axes(values: &[f64], unit: Units) -> Self {
        let axis = |i: usize| values.get(i).copied().unwrap_or(0.0);
        Self {
            x: axis(0),
            y: axis(1),
            z: axis(2),
            a: axis(3),
            b: axis(4),
            c: axis(5),
            unit,
        }
    }

    /// Component-wise `self - other`, keeping `self`'s unit
    pub fn minus(&self, other: &CNCPoint) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
            a: self.a - other.a,
            b: self.b - other.b,
            c: self.c - other.c,
            unit: self.unit,
        }
    }

    /// Component-wise `self + other`, keeping `self`'s unit
    pub fn plus(&self, other: &CNCPoint) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
            a: self.a + other.a,
            b: self.b + other.b,
            c: self.c + other.c,
            unit: self.unit,
        }
    }
}

impl Default for CNCPoint {
    fn default() -> Self {
        Self::new(Units::MM)
    }
}

impl fmt::Display for CNCPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} Z:{:.3} ({})",
            self.x, self.y, self.z, self.unit
        )
    }
}
