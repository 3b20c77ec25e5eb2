//! Core type definitions with validation.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Unknown start signal key.
    #[error("unknown start signal: {value}")]
    UnknownStartSignal { value: String },

    /// The value cannot be used as a single directory name.
    #[error("{field} must be a single path segment, got {value:?}")]
    NotAPathSegment { field: &'static str, value: String },
}

/// Checks that `value` names exactly one entry below a directory.
///
/// Rejects empty values, `.`/`..`, absolute paths and anything containing a
/// separator.
pub fn validate_path_segment(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(segment)), None) if segment == value => Ok(()),
        _ => Err(ValidationError::NotAPathSegment {
            field,
            value: value.to_string(),
        }),
    }
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated shipment identifier.
    ///
    /// Shipment IDs must be non-empty. Every raw event carries one; the
    /// grouper partitions events by it.
    ShipmentId, "shipment ID"
);

/// Geographic aggregation bucket: country plus leitzone.
///
/// Ordered by country, then leitzone, so maps keyed by it iterate
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeoKey {
    pub country_code: String,
    pub leitzone: String,
}

impl GeoKey {
    pub fn new(country_code: impl Into<String>, leitzone: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
            leitzone: leitzone.into(),
        }
    }

    /// Derives the bucket from a shipment's address.
    ///
    /// Returns `None` when the country is missing or blank, or the zip has
    /// fewer than two characters.
    pub fn from_address(country_code: Option<&str>, zip: Option<&str>) -> Option<Self> {
        let country_code = country_code.filter(|c| !c.trim().is_empty())?;
        let leitzone = leitzone_of(zip?)?;
        Some(Self::new(country_code, leitzone))
    }
}

impl fmt::Display for GeoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.leitzone, self.country_code)
    }
}

/// Returns the first two characters of a postal code.
pub fn leitzone_of(zip: &str) -> Option<String> {
    let mut chars = zip.chars();
    let first = chars.next()?;
    let second = chars.next()?;
    Some([first, second].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipment_id_rejects_empty() {
        assert!(ShipmentId::new("").is_err());
        assert!(ShipmentId::new("   ").is_err());
        assert!(ShipmentId::new("shp-1").is_ok());
    }

    #[test]
    fn shipment_id_serde_roundtrip() {
        let id = ShipmentId::new("shp-123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"shp-123\"");
        let parsed: ShipmentId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn shipment_id_serde_rejects_empty() {
        let result: Result<ShipmentId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn path_segment_must_stay_below_its_root() {
        assert!(validate_path_segment("shop ID", "shop-1").is_ok());
        assert!(validate_path_segment("shop ID", "20250301_143000").is_ok());
        for bad in ["", " ", ".", "..", "../victim", "/abs", "a/b", "shop/", "./shop"] {
            assert!(
                validate_path_segment("shop ID", bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
        assert_eq!(
            validate_path_segment("shop ID", "../x").unwrap_err().to_string(),
            "shop ID must be a single path segment, got \"../x\""
        );
    }

    #[test]
    fn leitzone_takes_two_chars() {
        assert_eq!(leitzone_of("94032").as_deref(), Some("94"));
        assert_eq!(leitzone_of("10").as_deref(), Some("10"));
        assert_eq!(leitzone_of("1"), None);
        assert_eq!(leitzone_of(""), None);
    }

    #[test]
    fn geo_key_requires_country_and_zip() {
        assert_eq!(
            GeoKey::from_address(Some("DE"), Some("94032")),
            Some(GeoKey::new("DE", "94"))
        );
        assert_eq!(GeoKey::from_address(None, Some("94032")), None);
        assert_eq!(GeoKey::from_address(Some(""), Some("94032")), None);
        assert_eq!(GeoKey::from_address(Some("DE"), Some("9")), None);
        assert_eq!(GeoKey::from_address(Some("DE"), None), None);
    }

    #[test]
    fn geo_key_orders_by_country_then_leitzone() {
        let mut keys = [
            GeoKey::new("DE", "94"),
            GeoKey::new("AT", "99"),
            GeoKey::new("DE", "10"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            [
                GeoKey::new("AT", "99"),
                GeoKey::new("DE", "10"),
                GeoKey::new("DE", "94"),
            ]
        );
    }
}
