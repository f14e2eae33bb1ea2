//! Typed, named values held by items.
//!
//! A field's kind is fixed when it is created. Every value written to it is
//! checked against that kind and validated (range, finiteness) before it is
//! stored, so a field's value always matches its kind.

use crate::units::{DistanceUnits, LatLongFormat, SpeedUnits, Units};
use crate::{error::Result, EnumDefinitions, Error};
use chrono::{DateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest valid IFF code (four octal digits).
pub const MAX_IFF_CODE: u16 = 0o7777;

/// Seconds in one day, the exclusive upper bound for time-of-day fields.
pub const SECS_PER_DAY: u32 = 86_400;

/// Largest number of decimal places a field may be configured to display.
pub const MAX_DISPLAY_NUM_DP: u8 = 10;

const DEFAULT_NUM_DP: u8 = 2;

/// Supported field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    String,
    Int,
    Double,
    Distance,
    Speed,
    Latitude,
    Longitude,
    Enum,
    Time,
    Date,
    IffCode,
    Bool,
}

impl FieldKind {
    /// Numeric code used by older tooling to identify field kinds.
    pub fn code(self) -> u8 {
        match self {
            FieldKind::String => 1,
            FieldKind::Int => 2,
            FieldKind::Double => 3,
            FieldKind::Distance => 4,
            FieldKind::Speed => 5,
            FieldKind::Latitude => 6,
            FieldKind::Longitude => 7,
            FieldKind::Enum => 8,
            FieldKind::Time => 9,
            FieldKind::Date => 10,
            FieldKind::IffCode => 11,
            FieldKind::Bool => 12,
        }
    }

    /// Whether values of this kind are stored as integers.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            FieldKind::Int
                | FieldKind::Enum
                | FieldKind::Time
                | FieldKind::Date
                | FieldKind::IffCode
                | FieldKind::Bool
        )
    }

    /// Whether values of this kind are stored as floating point.
    pub fn is_floating(self) -> bool {
        matches!(
            self,
            FieldKind::Double
                | FieldKind::Distance
                | FieldKind::Speed
                | FieldKind::Latitude
                | FieldKind::Longitude
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Double => "double",
            FieldKind::Distance => "distance",
            FieldKind::Speed => "speed",
            FieldKind::Latitude => "latitude",
            FieldKind::Longitude => "longitude",
            FieldKind::Enum => "enum",
            FieldKind::Time => "time",
            FieldKind::Date => "date",
            FieldKind::IffCode => "iffCode",
            FieldKind::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A field value, one variant per field kind.
///
/// Distances are in metres and speeds in metres per second. Times are
/// seconds since midnight, dates are days since 1970-01-01.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Double(f64),
    Distance(f64),
    Speed(f64),
    Latitude(f64),
    Longitude(f64),
    Enum(i64),
    Time(u32),
    Date(i64),
    IffCode(u16),
    Bool(bool),
}

impl FieldValue {
    /// The zero value a freshly created field of `kind` holds.
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::String => FieldValue::String(String::new()),
            FieldKind::Int => FieldValue::Int(0),
            FieldKind::Double => FieldValue::Double(0.0),
            FieldKind::Distance => FieldValue::Distance(0.0),
            FieldKind::Speed => FieldValue::Speed(0.0),
            FieldKind::Latitude => FieldValue::Latitude(0.0),
            FieldKind::Longitude => FieldValue::Longitude(0.0),
            FieldKind::Enum => FieldValue::Enum(0),
            FieldKind::Time => FieldValue::Time(0),
            FieldKind::Date => FieldValue::Date(0),
            FieldKind::IffCode => FieldValue::IffCode(0),
            FieldKind::Bool => FieldValue::Bool(false),
        }
    }

    /// Distance value entered in `units`.
    pub fn distance(value: f64, units: DistanceUnits) -> Self {
        FieldValue::Distance(units.to_metres(value))
    }

    /// Speed value entered in `units`.
    pub fn speed(value: f64, units: SpeedUnits) -> Self {
        FieldValue::Speed(units.to_mps(value))
    }

    /// Build an integer-backed value of `kind`.
    ///
    /// Fails if `kind` is not integer-backed or `value` is out of range for it
    /// (a bool accepts only 0 or 1).
    pub fn from_int(kind: FieldKind, value: i64) -> Result<Self> {
        let out_of_range = || Error::InvalidArgument(format!("{value} is out of range for {kind}"));
        let value = match kind {
            FieldKind::Int => FieldValue::Int(value),
            FieldKind::Enum => FieldValue::Enum(value),
            FieldKind::Date => FieldValue::Date(value),
            FieldKind::Time => FieldValue::Time(u32::try_from(value).map_err(|_| out_of_range())?),
            FieldKind::IffCode => {
                FieldValue::IffCode(u16::try_from(value).map_err(|_| out_of_range())?)
            }
            FieldKind::Bool => match value {
                0 => FieldValue::Bool(false),
                1 => FieldValue::Bool(true),
                _ => return Err(out_of_range()),
            },
            _ => {
                return Err(Error::UnsupportedOperation(format!(
                    "{kind} field cannot be set from an integer"
                )))
            }
        };
        value.validated()
    }

    /// Build a floating-point value of `kind` (SI units for physical quantities).
    pub fn from_double(kind: FieldKind, value: f64) -> Result<Self> {
        let value = match kind {
            FieldKind::Double => FieldValue::Double(value),
            FieldKind::Distance => FieldValue::Distance(value),
            FieldKind::Speed => FieldValue::Speed(value),
            FieldKind::Latitude => FieldValue::Latitude(value),
            FieldKind::Longitude => FieldValue::Longitude(value),
            _ => {
                return Err(Error::UnsupportedOperation(format!(
                    "{kind} field cannot be set from a double"
                )))
            }
        };
        value.validated()
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::String(_) => FieldKind::String,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Double(_) => FieldKind::Double,
            FieldValue::Distance(_) => FieldKind::Distance,
            FieldValue::Speed(_) => FieldKind::Speed,
            FieldValue::Latitude(_) => FieldKind::Latitude,
            FieldValue::Longitude(_) => FieldKind::Longitude,
            FieldValue::Enum(_) => FieldKind::Enum,
            FieldValue::Time(_) => FieldKind::Time,
            FieldValue::Date(_) => FieldKind::Date,
            FieldValue::IffCode(_) => FieldKind::IffCode,
            FieldValue::Bool(_) => FieldKind::Bool,
        }
    }

    /// Check the value is in range for its kind, normalising where the kind
    /// allows it (longitudes wrap into -180..=180).
    pub fn validated(self) -> Result<Self> {
        let invalid = |what: &str| Err(Error::InvalidArgument(what.to_string()));
        match self {
            FieldValue::Double(v) if !v.is_finite() => invalid("double must be finite"),
            FieldValue::Distance(v) if !v.is_finite() || v < 0.0 => {
                invalid("distance must be finite and non-negative")
            }
            FieldValue::Speed(v) if !v.is_finite() || v < 0.0 => {
                invalid("speed must be finite and non-negative")
            }
            FieldValue::Latitude(v) if !v.is_finite() || !(-90.0..=90.0).contains(&v) => {
                invalid("latitude must be within -90..=90 degrees")
            }
            FieldValue::Longitude(v) if !v.is_finite() => invalid("longitude must be finite"),
            FieldValue::Longitude(v) if !(-180.0..=180.0).contains(&v) => {
                Ok(FieldValue::Longitude((v + 180.0).rem_euclid(360.0) - 180.0))
            }
            FieldValue::Time(v) if v >= SECS_PER_DAY => {
                invalid("time must be less than 86400 seconds since midnight")
            }
            FieldValue::IffCode(v) if v > MAX_IFF_CODE => invalid("IFF code must be 0..=0o7777"),
            FieldValue::Date(v) if DateTime::from_timestamp(v.saturating_mul(86_400), 0).is_none() => {
                invalid("date is outside the representable range")
            }
            value => Ok(value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Double(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// A single named field inside an item.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    value: FieldValue,
    display_units: Option<Units>,
    display_num_dp: Option<u8>,
    unit_label: Option<String>,
    enum_name: Option<String>,
}

impl Field {
    /// Create a field holding the zero value for `kind`.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self::with_value(name, FieldValue::default_for(kind))
    }

    /// Create a field holding `value`. The value is not validated.
    pub(crate) fn with_value(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            display_units: None,
            display_num_dp: None,
            unit_label: None,
            enum_name: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Replace the value. The new value must be of the field's kind.
    pub fn set_value(&mut self, value: FieldValue) -> Result<()> {
        if value.kind() != self.kind() {
            return Err(Error::InvalidArgument(format!(
                "field '{}' is {}, cannot store {}",
                self.name,
                self.kind(),
                value.kind()
            )));
        }
        self.value = value.validated()?;
        Ok(())
    }

    /// Value as an integer, for integer-backed kinds.
    pub fn value_as_int(&self) -> Result<i64> {
        match self.value {
            FieldValue::Int(v) | FieldValue::Enum(v) | FieldValue::Date(v) => Ok(v),
            FieldValue::Time(v) => Ok(i64::from(v)),
            FieldValue::IffCode(v) => Ok(i64::from(v)),
            FieldValue::Bool(v) => Ok(i64::from(v)),
            _ => Err(self.unsupported("read as an integer")),
        }
    }

    /// Value as a double, for floating-point kinds (SI units).
    pub fn value_as_double(&self) -> Result<f64> {
        match self.value {
            FieldValue::Double(v)
            | FieldValue::Distance(v)
            | FieldValue::Speed(v)
            | FieldValue::Latitude(v)
            | FieldValue::Longitude(v) => Ok(v),
            _ => Err(self.unsupported("read as a double")),
        }
    }

    /// Distance value converted to `units`.
    pub fn value_as_distance(&self, units: DistanceUnits) -> Result<f64> {
        match self.value {
            FieldValue::Distance(metres) => Ok(units.from_metres(metres)),
            _ => Err(self.unsupported("read as a distance")),
        }
    }

    /// Speed value converted to `units`.
    pub fn value_as_speed(&self, units: SpeedUnits) -> Result<f64> {
        match self.value {
            FieldValue::Speed(mps) => Ok(units.from_mps(mps)),
            _ => Err(self.unsupported("read as a speed")),
        }
    }

    /// Name of the enumeration definition used to render an enum field.
    ///
    /// Defaults to the field's own name.
    pub fn enum_name(&self) -> Result<&str> {
        match self.kind() {
            FieldKind::Enum => Ok(self.enum_name.as_deref().unwrap_or(&self.name)),
            _ => Err(self.unsupported("have an enumeration name")),
        }
    }

    pub fn set_enum_name(&mut self, enum_name: impl Into<String>) -> Result<()> {
        if self.kind() != FieldKind::Enum {
            return Err(self.unsupported("have an enumeration name"));
        }
        self.enum_name = Some(enum_name.into());
        Ok(())
    }

    /// Units the value is displayed in, if configured.
    pub fn display_units(&self) -> Option<Units> {
        self.display_units
    }

    pub fn set_display_units(&mut self, units: impl Into<Units>) -> Result<()> {
        let units = units.into();
        if !units.applies_to(self.kind()) {
            return Err(self.unsupported(&format!("be displayed in {}", units.label())));
        }
        self.display_units = Some(units);
        Ok(())
    }

    /// Decimal places the value is displayed with, if configured.
    pub fn display_num_dp(&self) -> Option<u8> {
        self.display_num_dp
    }

    pub fn set_display_num_dp(&mut self, num_dp: u8) -> Result<()> {
        if !self.kind().is_floating() {
            return Err(self.unsupported("have display decimal places"));
        }
        if num_dp > MAX_DISPLAY_NUM_DP {
            return Err(Error::InvalidArgument(format!(
                "at most {MAX_DISPLAY_NUM_DP} decimal places can be displayed"
            )));
        }
        self.display_num_dp = Some(num_dp);
        Ok(())
    }

    /// Free-form unit label appended to int and double values.
    pub fn unit_label(&self) -> Option<&str> {
        self.unit_label.as_deref()
    }

    pub fn set_unit_label(&mut self, label: impl Into<String>) -> Result<()> {
        if !matches!(self.kind(), FieldKind::Int | FieldKind::Double) {
            return Err(self.unsupported("have a unit label"));
        }
        self.unit_label = Some(label.into());
        Ok(())
    }

    /// Copy display configuration (units, decimal places, labels, enum name)
    /// from another field. Used when rebuilding fields from a message.
    pub(crate) fn set_display_parts(
        &mut self,
        units: Option<Units>,
        num_dp: Option<u8>,
        unit_label: Option<String>,
        enum_name: Option<String>,
    ) {
        self.display_units = units.filter(|u| u.applies_to(self.kind()));
        self.display_num_dp = num_dp.map(|dp| dp.min(MAX_DISPLAY_NUM_DP));
        self.unit_label = unit_label;
        self.enum_name = enum_name.filter(|_| self.kind() == FieldKind::Enum);
    }

    pub(crate) fn raw_enum_name(&self) -> Option<&str> {
        self.enum_name.as_deref()
    }

    /// Render the value as display text. Never fails.
    pub fn value_string(&self, enums: &EnumDefinitions) -> String {
        let dp = self.display_num_dp.unwrap_or(DEFAULT_NUM_DP) as usize;
        let text = match &self.value {
            FieldValue::String(s) => s.clone(),
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Double(v) => format!("{v:.dp$}"),
            FieldValue::Distance(metres) => {
                let units = match self.display_units {
                    Some(Units::Distance(units)) => units,
                    _ => DistanceUnits::Metres,
                };
                format!("{:.dp$} {}", units.from_metres(*metres), units.label())
            }
            FieldValue::Speed(mps) => {
                let units = match self.display_units {
                    Some(Units::Speed(units)) => units,
                    _ => SpeedUnits::MetresPerSec,
                };
                format!("{:.dp$} {}", units.from_mps(*mps), units.label())
            }
            FieldValue::Latitude(v) => {
                let format = self.lat_long_format();
                let dp = self.display_num_dp.unwrap_or(format.default_num_dp());
                format.format(*v, 'N', 'S', dp)
            }
            FieldValue::Longitude(v) => {
                let format = self.lat_long_format();
                let dp = self.display_num_dp.unwrap_or(format.default_num_dp());
                format.format(*v, 'E', 'W', dp)
            }
            FieldValue::Enum(v) => {
                let enum_name = self.enum_name.as_deref().unwrap_or(&self.name);
                match enums.string_for(enum_name, *v) {
                    Ok(s) => s.to_string(),
                    Err(_) => v.to_string(),
                }
            }
            FieldValue::Time(secs) => match NaiveTime::from_num_seconds_from_midnight_opt(*secs, 0) {
                Some(time) => time.format("%H:%M:%S").to_string(),
                None => secs.to_string(),
            },
            FieldValue::Date(days) => match DateTime::from_timestamp(days.saturating_mul(86_400), 0)
            {
                Some(date) => date.date_naive().format("%Y-%m-%d").to_string(),
                None => days.to_string(),
            },
            FieldValue::IffCode(code) => format!("{code:04o}"),
            FieldValue::Bool(true) => "Yes".to_string(),
            FieldValue::Bool(false) => "No".to_string(),
        };
        match (&self.value, &self.unit_label) {
            (FieldValue::Int(_) | FieldValue::Double(_), Some(label)) => format!("{text} {label}"),
            _ => text,
        }
    }

    fn lat_long_format(&self) -> LatLongFormat {
        match self.display_units {
            Some(Units::LatLong(format)) => format,
            _ => LatLongFormat::Degrees,
        }
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::UnsupportedOperation(format!(
            "{} field '{}' cannot {what}",
            self.kind(),
            self.name
        ))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value_string(&EnumDefinitions::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnumDefinition;

    #[test]
    fn new_field_holds_zero_value() {
        let field = Field::new("range", FieldKind::Distance);
        assert_eq!(field.kind(), FieldKind::Distance);
        assert_eq!(field.value(), &FieldValue::Distance(0.0));
    }

    #[test]
    fn set_value_rejects_other_kinds() {
        let mut field = Field::new("name", FieldKind::String);
        let err = field.set_value(FieldValue::Int(3)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(field.kind(), FieldKind::String);
    }

    #[test]
    fn latitude_out_of_range_is_rejected() {
        let mut field = Field::new("lat", FieldKind::Latitude);
        assert!(field.set_value(FieldValue::Latitude(90.0)).is_ok());
        let err = field.set_value(FieldValue::Latitude(90.5)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(field.value(), &FieldValue::Latitude(90.0));
    }

    #[test]
    fn longitude_wraps() {
        let mut field = Field::new("lon", FieldKind::Longitude);
        field.set_value(FieldValue::Longitude(190.0)).unwrap();
        assert!((field.value_as_double().unwrap() + 170.0).abs() < 1e-9);
    }

    #[test]
    fn bool_from_int_accepts_only_zero_or_one() {
        assert_eq!(
            FieldValue::from_int(FieldKind::Bool, 1).unwrap(),
            FieldValue::Bool(true)
        );
        assert!(matches!(
            FieldValue::from_int(FieldKind::Bool, 2),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            FieldValue::from_int(FieldKind::String, 1),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn value_as_int_unsupported_for_strings() {
        let field = Field::with_value("name", "radar-1".into());
        assert!(matches!(
            field.value_as_int(),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(matches!(
            field.value_as_double(),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn distance_round_trips_through_units() {
        let field = Field::with_value(
            "range",
            FieldValue::distance(10.0, DistanceUnits::NauticalMiles),
        );
        let nmi = field.value_as_distance(DistanceUnits::NauticalMiles).unwrap();
        assert!((nmi - 10.0).abs() < 1e-9);
        assert!((field.value_as_double().unwrap() - 18520.0).abs() < 1e-9);
    }

    #[test]
    fn display_configuration_checks_kind() {
        let mut range = Field::new("range", FieldKind::Distance);
        range.set_display_units(DistanceUnits::NauticalMiles).unwrap();
        range.set_display_num_dp(1).unwrap();
        assert!(range.set_display_units(SpeedUnits::Knots).is_err());

        let mut name = Field::new("name", FieldKind::String);
        assert!(matches!(
            name.set_display_num_dp(2),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(matches!(
            name.set_enum_name("x"),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(matches!(name.enum_name(), Err(Error::UnsupportedOperation(_))));
    }

    #[test]
    fn renders_each_kind() {
        let enums = EnumDefinitions::new();

        let mut range = Field::with_value("range", FieldValue::distance(10.0, DistanceUnits::NauticalMiles));
        range.set_display_units(DistanceUnits::NauticalMiles).unwrap();
        range.set_display_num_dp(1).unwrap();
        assert_eq!(range.value_string(&enums), "10.0 NM");

        let time = Field::with_value("tod", FieldValue::Time(3661));
        assert_eq!(time.value_string(&enums), "01:01:01");

        let date = Field::with_value("day", FieldValue::Date(19_000));
        assert_eq!(date.value_string(&enums), "2022-01-08");

        let iff = Field::with_value("mode3a", FieldValue::IffCode(0o7700));
        assert_eq!(iff.value_string(&enums), "7700");

        let flag = Field::with_value("armed", FieldValue::Bool(true));
        assert_eq!(flag.value_string(&enums), "Yes");

        let mut count = Field::with_value("count", FieldValue::Int(4));
        count.set_unit_label("tracks").unwrap();
        assert_eq!(count.value_string(&enums), "4 tracks");
    }

    #[test]
    fn enum_renders_through_definitions() {
        let mut enums = EnumDefinitions::new();
        enums
            .add(EnumDefinition::new("status").with_value(0, "Off").with_value(1, "Transmitting"))
            .unwrap();

        let mut field = Field::with_value("radarStatus", FieldValue::Enum(1));
        assert_eq!(field.value_string(&enums), "1");
        assert_eq!(field.enum_name().unwrap(), "radarStatus");

        field.set_enum_name("status").unwrap();
        assert_eq!(field.value_string(&enums), "Transmitting");

        field.set_value(FieldValue::Enum(7)).unwrap();
        assert_eq!(field.value_string(&enums), "7");
    }
}
