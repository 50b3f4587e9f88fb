use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::error::{ActuatorError, format_error};
use crate::common::parser::{format_parse_error, p_version_triplet};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SchemaVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// A schema is compatible with the `required` version if it is on the same major line and
    /// neither its minor nor its patch component is older.
    pub fn is_compatible(&self, required: &SchemaVersion) -> bool {
        self.major == required.major && self.minor >= required.minor && self.patch >= required.patch
    }
}

impl Display for SchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = ActuatorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let components = value.split('.').count();
        if components != 3 {
            return format_error(format!(
                "Version `{value}` must have exactly three components, found {components}"
            ));
        }
        match p_version_triplet(value) {
            Ok((_, (major, minor, patch))) => Ok(Self::new(major, minor, patch)),
            Err(error) => format_error(format!(
                "Invalid version `{value}`: {}",
                format_parse_error(error)
            )),
        }
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: String = Deserialize::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
