//! IP geolocation used to annotate farmer tokens.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::NodeError;

/// Location attached to a token. Every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

pub trait Geolocator: Send + Sync {
    /// Unknown addresses yield an empty [`Location`], never an error.
    fn lookup(&self, ip: &str) -> Location;
}

/// Geolocation disabled.
pub struct NullGeolocator;

impl Geolocator for NullGeolocator {
    fn lookup(&self, _ip: &str) -> Location {
        Location::default()
    }
}

/// Static table loaded from a JSON object of `ip -> location`.
pub struct TableGeolocator {
    entries: HashMap<String, Location>,
}

impl TableGeolocator {
    pub fn new(entries: HashMap<String, Location>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)?;
        let entries: HashMap<String, Location> = serde_json::from_str(&content)?;
        info!(path = %path.display(), entries = entries.len(), "Loaded geolocation table");
        Ok(Self::new(entries))
    }
}

impl Geolocator for TableGeolocator {
    fn lookup(&self, ip: &str) -> Location {
        self.entries.get(ip).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.json");
        std::fs::write(
            &path,
            r#"{"10.0.0.1": {"country": "US", "city": "Portland"}, "10.0.0.2": {}}"#,
        )
        .unwrap();

        let geo = TableGeolocator::load(&path).unwrap();
        let loc = geo.lookup("10.0.0.1");
        assert_eq!(loc.country.as_deref(), Some("US"));
        assert_eq!(loc.city.as_deref(), Some("Portland"));
        assert!(loc.zip.is_none());

        assert_eq!(geo.lookup("10.0.0.2"), Location::default());
        assert_eq!(geo.lookup("192.168.1.1"), Location::default());
    }

    #[test]
    fn test_null_geolocator() {
        assert_eq!(NullGeolocator.lookup("1.2.3.4"), Location::default());
    }
}
