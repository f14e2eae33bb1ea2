//! Display units for physical-quantity fields.
//!
//! Distance and speed values are always stored in SI units (metres and
//! metres per second). Units only affect how a value is entered, read back
//! or rendered.

use crate::FieldKind;
use serde::{Deserialize, Serialize};

const METRES_PER_NAUTICAL_MILE: f64 = 1852.0;
const METRES_PER_MILE: f64 = 1609.344;
const METRES_PER_FOOT: f64 = 0.3048;
const METRES_PER_YARD: f64 = 0.9144;

/// Units for distance fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistanceUnits {
    Metres,
    Kilometres,
    NauticalMiles,
    Miles,
    Feet,
    Yards,
}

impl DistanceUnits {
    fn metres_per_unit(self) -> f64 {
        match self {
            DistanceUnits::Metres => 1.0,
            DistanceUnits::Kilometres => 1000.0,
            DistanceUnits::NauticalMiles => METRES_PER_NAUTICAL_MILE,
            DistanceUnits::Miles => METRES_PER_MILE,
            DistanceUnits::Feet => METRES_PER_FOOT,
            DistanceUnits::Yards => METRES_PER_YARD,
        }
    }

    /// Convert a value in these units to metres.
    pub fn to_metres(self, value: f64) -> f64 {
        value * self.metres_per_unit()
    }

    /// Convert a value in metres to these units.
    pub fn from_metres(self, metres: f64) -> f64 {
        metres / self.metres_per_unit()
    }

    pub fn label(self) -> &'static str {
        match self {
            DistanceUnits::Metres => "m",
            DistanceUnits::Kilometres => "km",
            DistanceUnits::NauticalMiles => "NM",
            DistanceUnits::Miles => "mi",
            DistanceUnits::Feet => "ft",
            DistanceUnits::Yards => "yd",
        }
    }
}

/// Units for speed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeedUnits {
    MetresPerSec,
    Knots,
    KilometresPerHour,
    MilesPerHour,
}

impl SpeedUnits {
    fn mps_per_unit(self) -> f64 {
        match self {
            SpeedUnits::MetresPerSec => 1.0,
            SpeedUnits::Knots => METRES_PER_NAUTICAL_MILE / 3600.0,
            SpeedUnits::KilometresPerHour => 1000.0 / 3600.0,
            SpeedUnits::MilesPerHour => METRES_PER_MILE / 3600.0,
        }
    }

    /// Convert a value in these units to metres per second.
    pub fn to_mps(self, value: f64) -> f64 {
        value * self.mps_per_unit()
    }

    /// Convert a value in metres per second to these units.
    pub fn from_mps(self, mps: f64) -> f64 {
        mps / self.mps_per_unit()
    }

    pub fn label(self) -> &'static str {
        match self {
            SpeedUnits::MetresPerSec => "m/s",
            SpeedUnits::Knots => "kts",
            SpeedUnits::KilometresPerHour => "km/h",
            SpeedUnits::MilesPerHour => "mph",
        }
    }
}

/// Rendering format for latitude and longitude fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LatLongFormat {
    Degrees,
    DegreesMinutes,
    DegreesMinutesSeconds,
}

impl LatLongFormat {
    pub fn label(self) -> &'static str {
        match self {
            LatLongFormat::Degrees => "deg",
            LatLongFormat::DegreesMinutes => "DM",
            LatLongFormat::DegreesMinutesSeconds => "DMS",
        }
    }

    /// Decimal places used for the last component when none is configured.
    pub fn default_num_dp(self) -> u8 {
        match self {
            LatLongFormat::Degrees => 5,
            LatLongFormat::DegreesMinutes => 3,
            LatLongFormat::DegreesMinutesSeconds => 1,
        }
    }

    /// Render an angle with a hemisphere letter, e.g. `51 30.000 N`.
    ///
    /// The angle is rounded to the precision of its last component before
    /// it is split, so seconds and minutes never read 60.
    pub fn format(self, value: f64, positive: char, negative: char, num_dp: u8) -> String {
        let hemisphere = if value < 0.0 { negative } else { positive };
        let abs = value.abs();
        let dp = num_dp as usize;
        let scale = 10_u64.pow(u32::from(num_dp));
        let width = if dp == 0 { 2 } else { dp + 3 };
        match self {
            LatLongFormat::Degrees => format!("{abs:.dp$} {hemisphere}"),
            LatLongFormat::DegreesMinutes => {
                let per_degree = 60 * scale;
                let total = (abs * per_degree as f64).round() as u64;
                let degrees = total / per_degree;
                let minutes = (total % per_degree) as f64 / scale as f64;
                format!("{degrees} {minutes:0>width$.dp$} {hemisphere}")
            }
            LatLongFormat::DegreesMinutesSeconds => {
                let per_minute = 60 * scale;
                let per_degree = 60 * per_minute;
                let total = (abs * per_degree as f64).round() as u64;
                let degrees = total / per_degree;
                let minutes = (total % per_degree) / per_minute;
                let seconds = (total % per_minute) as f64 / scale as f64;
                format!("{degrees} {minutes:02} {seconds:0>width$.dp$} {hemisphere}")
            }
        }
    }
}

/// Display units for any physical-quantity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Units {
    Distance(DistanceUnits),
    Speed(SpeedUnits),
    LatLong(LatLongFormat),
}

impl Units {
    /// Whether these units can be used to display a field of `kind`.
    pub fn applies_to(self, kind: FieldKind) -> bool {
        matches!(
            (self, kind),
            (Units::Distance(_), FieldKind::Distance)
                | (Units::Speed(_), FieldKind::Speed)
                | (Units::LatLong(_), FieldKind::Latitude | FieldKind::Longitude)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Units::Distance(u) => u.label(),
            Units::Speed(u) => u.label(),
            Units::LatLong(f) => f.label(),
        }
    }
}

impl From<DistanceUnits> for Units {
    fn from(units: DistanceUnits) -> Self {
        Units::Distance(units)
    }
}

impl From<SpeedUnits> for Units {
    fn from(units: SpeedUnits) -> Self {
        Units::Speed(units)
    }
}

impl From<LatLongFormat> for Units {
    fn from(format: LatLongFormat) -> Self {
        Units::LatLong(format)
    }
}

/// Short label for `units` when displayed on a field of `kind`.
///
/// Returns `None` if the units do not apply to that kind of field.
pub fn units_label_for_field(kind: FieldKind, units: Units) -> Option<&'static str> {
    units.applies_to(kind).then(|| units.label())
}
