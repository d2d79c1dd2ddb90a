use crate::TsError;
use std::{fmt, str::FromStr};

/// Unit of the displacement column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LengthUnit {
    #[default]
    Meters,
    Centimeters,
    Millimeters,
}

impl LengthUnit {
    fn meters_per_unit(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Centimeters => 1e-2,
            Self::Millimeters => 1e-3,
        }
    }

    pub fn to_meters(self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    pub fn from_meters(self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }
}

impl FromStr for LengthUnit {
    type Err = TsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "meter" | "meters" | "metre" | "metres" => Ok(Self::Meters),
            "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => {
                Ok(Self::Centimeters)
            }
            "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => {
                Ok(Self::Millimeters)
            }
            _ => Err(TsError::Unit(s.to_string())),
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abbrev = match self {
            Self::Meters => "m",
            Self::Centimeters => "cm",
            Self::Millimeters => "mm",
        };
        f.write_str(abbrev)
    }
}
