//! Enumeration definitions referenced by enum fields.
//!
//! The table is configured once when a node is built and is read-only
//! afterwards. Lookups have no network effect.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of definitions a table can hold.
pub const MAX_ENUM_DEFINITIONS: usize = 32;

/// A named enumeration mapping integer values to display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumDefinition {
    pub name: String,
    /// Value/string pairs in configuration order
    pub values: Vec<(i64, String)>,
}

impl EnumDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Builder-style helper to add a value.
    pub fn with_value(mut self, value: i64, text: impl Into<String>) -> Self {
        self.values.push((value, text.into()));
        self
    }

    /// Display string for `value`, if defined.
    pub fn string_for(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, s)| s.as_str())
    }
}

impl FromStr for EnumDefinition {
    type Err = Error;

    /// Parse `name:0=Off,1=On`.
    fn from_str(s: &str) -> Result<Self> {
        let (name, values) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidArgument(format!("enumeration '{s}' has no ':'")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("enumeration name is empty".into()));
        }

        let mut definition = EnumDefinition::new(name);
        for pair in values.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (value, text) = pair.split_once('=').ok_or_else(|| {
                Error::InvalidArgument(format!("enumeration entry '{pair}' has no '='"))
            })?;
            let value = value.trim().parse::<i64>().map_err(|_| {
                Error::InvalidArgument(format!("enumeration value '{value}' is not an integer"))
            })?;
            definition = definition.with_value(value, text.trim());
        }
        Ok(definition)
    }
}

impl fmt::Display for EnumDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        for (i, (value, text)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}={text}")?;
        }
        Ok(())
    }
}

/// Ordered, bounded table of enumeration definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDefinitions {
    definitions: Vec<EnumDefinition>,
}

impl EnumDefinitions {
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
        }
    }

    /// Add a definition, replacing any existing one with the same name.
    pub fn add(&mut self, definition: EnumDefinition) -> Result<()> {
        if let Some(existing) = self
            .definitions
            .iter_mut()
            .find(|d| d.name == definition.name)
        {
            *existing = definition;
            return Ok(());
        }
        if self.definitions.len() >= MAX_ENUM_DEFINITIONS {
            return Err(Error::InvalidArgument(format!(
                "at most {MAX_ENUM_DEFINITIONS} enumeration definitions are supported"
            )));
        }
        self.definitions.push(definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EnumDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnumDefinition> {
        self.definitions.iter()
    }

    fn lookup(&self, name: &str) -> Result<&EnumDefinition> {
        self.get(name)
            .ok_or_else(|| Error::EnumNotFound(name.to_string()))
    }

    /// Number of values defined for the named enumeration.
    pub fn value_count(&self, name: &str) -> Result<usize> {
        Ok(self.lookup(name)?.values.len())
    }

    /// Values defined for the named enumeration, in configuration order.
    pub fn value_list(&self, name: &str) -> Result<Vec<i64>> {
        Ok(self.lookup(name)?.values.iter().map(|(v, _)| *v).collect())
    }

    /// Display string for `value` in the named enumeration.
    pub fn string_for(&self, name: &str, value: i64) -> Result<&str> {
        self.lookup(name)?.string_for(value).ok_or_else(|| {
            Error::InvalidArgument(format!("{value} is not defined in enumeration '{name}'"))
        })
    }
}

impl FromStr for EnumDefinitions {
    type Err = Error;

    /// Parse `;`-separated definitions, e.g. `status:0=Off,1=On;mode:1=A,2=C`.
    fn from_str(s: &str) -> Result<Self> {
        let mut table = EnumDefinitions::new();
        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            table.add(part.parse()?)?;
        }
        Ok(table)
    }
}

impl fmt::Display for EnumDefinitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, definition) in self.definitions.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{definition}")?;
        }
        Ok(())
    }
}
