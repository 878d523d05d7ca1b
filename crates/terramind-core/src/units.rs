//! Linear and area units accepted in operation parameters.

use serde::{Deserialize, Serialize};

use crate::error::{GeoError, Result};

/// Meters per statute mile (fixed conversion used throughout the engine).
pub const METERS_PER_MILE: f64 = 1609.34;
pub const METERS_PER_KILOMETER: f64 = 1000.0;
pub const METERS_PER_FOOT: f64 = 0.3048;
pub const METERS_PER_NAUTICAL_MILE: f64 = 1852.0;
pub const SQUARE_METERS_PER_ACRE: f64 = 4046.856_422_4;
pub const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearUnit {
    #[default]
    Miles,
    Kilometers,
    Meters,
    Feet,
    NauticalMiles,
}

impl LinearUnit {
    pub fn parse(s: &str) -> Result<Self> {
        match normalize_unit(s).as_str() {
            "miles" | "mile" | "mi" => Ok(Self::Miles),
            "kilometers" | "kilometer" | "kilometres" | "kilometre" | "km" => Ok(Self::Kilometers),
            "meters" | "meter" | "metres" | "metre" | "m" => Ok(Self::Meters),
            "feet" | "foot" | "ft" => Ok(Self::Feet),
            "nautical_miles" | "nautical_mile" | "nm" | "nmi" => Ok(Self::NauticalMiles),
            other => Err(GeoError::invalid(format!(
                "unknown linear unit `{other}` (expected miles, kilometers, meters, feet or nautical_miles)"
            ))),
        }
    }

    pub fn meters_per_unit(self) -> f64 {
        match self {
            Self::Miles => METERS_PER_MILE,
            Self::Kilometers => METERS_PER_KILOMETER,
            Self::Meters => 1.0,
            Self::Feet => METERS_PER_FOOT,
            Self::NauticalMiles => METERS_PER_NAUTICAL_MILE,
        }
    }

    pub fn to_meters(self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    pub fn from_meters(self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Miles => "miles",
            Self::Kilometers => "kilometers",
            Self::Meters => "meters",
            Self::Feet => "feet",
            Self::NauticalMiles => "nautical_miles",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaUnit {
    #[default]
    SquareMiles,
    SquareKilometers,
    SquareMeters,
    Acres,
    Hectares,
}

impl AreaUnit {
    pub fn parse(s: &str) -> Result<Self> {
        match normalize_unit(s).as_str() {
            "square_miles" | "square_mile" | "sq_mi" | "sq_miles" | "mi2" => Ok(Self::SquareMiles),
            "square_kilometers" | "square_kilometer" | "square_kilometres" | "sq_km" | "km2" => {
                Ok(Self::SquareKilometers)
            }
            "square_meters" | "square_meter" | "square_metres" | "sq_m" | "m2" => {
                Ok(Self::SquareMeters)
            }
            "acres" | "acre" | "ac" => Ok(Self::Acres),
            "hectares" | "hectare" | "ha" => Ok(Self::Hectares),
            other => Err(GeoError::invalid(format!(
                "unknown area unit `{other}` (expected square_miles, square_kilometers, square_meters, acres or hectares)"
            ))),
        }
    }

    pub fn square_meters_per_unit(self) -> f64 {
        match self {
            Self::SquareMiles => METERS_PER_MILE * METERS_PER_MILE,
            Self::SquareKilometers => METERS_PER_KILOMETER * METERS_PER_KILOMETER,
            Self::SquareMeters => 1.0,
            Self::Acres => SQUARE_METERS_PER_ACRE,
            Self::Hectares => SQUARE_METERS_PER_HECTARE,
        }
    }

    pub fn from_square_meters(self, sq_m: f64) -> f64 {
        sq_m / self.square_meters_per_unit()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SquareMiles => "square_miles",
            Self::SquareKilometers => "square_kilometers",
            Self::SquareMeters => "square_meters",
            Self::Acres => "acres",
            Self::Hectares => "hectares",
        }
    }
}

fn normalize_unit(s: &str) -> String {
    s.trim()
        .to_ascii_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
