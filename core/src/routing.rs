//! Static destination list and route planning between the rider and a
//! selected destination.

use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::models::{Coordinate, Destination};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read destinations file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse destinations file: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Duplicate destination name: {0}")]
    DuplicateName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("No destination selected")]
    NoSelection,
    #[error("Current location unknown")]
    NoUserLocation,
    #[error("Destination not found: {0}")]
    DestinationNotFound(String),
}

/// Endpoints handed to the map surface, in (user, destination) order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteRequest {
    pub user_lat: f64,
    pub user_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
}

/// Destinations loaded once at startup, keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct DestinationCatalog {
    destinations: Vec<Destination>,
}

impl DestinationCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json(&content)?;
        info!(
            path = %path.as_ref().display(),
            count = catalog.len(),
            "Loaded destination catalog"
        );
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let destinations: Vec<Destination> = serde_json::from_str(json)?;
        Self::new(destinations)
    }

    pub fn new(destinations: Vec<Destination>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for destination in &destinations {
            if !seen.insert(destination.name.as_str()) {
                return Err(CatalogError::DuplicateName(destination.name.clone()));
            }
        }
        Ok(Self { destinations })
    }

    pub fn find(&self, name: &str) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.name == name)
    }

    pub fn all(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

pub fn plan_route(
    user: Option<Coordinate>,
    catalog: &DestinationCatalog,
    name: &str,
) -> Result<RouteRequest, RouteError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RouteError::NoSelection);
    }
    let user = user.ok_or(RouteError::NoUserLocation)?;
    let destination = catalog
        .find(name)
        .ok_or_else(|| RouteError::DestinationNotFound(name.to_string()))?;

    Ok(RouteRequest {
        user_lat: user.latitude(),
        user_lon: user.longitude(),
        dest_lat: destination.coordinate.latitude(),
        dest_lon: destination.coordinate.longitude(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"[
        {"name": "Plaza Bolívar", "lat": 10.5, "lon": -66.9},
        {"name": "Orinokia Mall", "lat": 8.2955, "lon": -62.7335}
    ]"#;

    fn catalog() -> DestinationCatalog {
        DestinationCatalog::from_json(CATALOG).unwrap()
    }

    #[test]
    fn test_route_uses_user_then_destination_coordinates() {
        let user = Coordinate::new(8.29, -62.72).unwrap();
        let route = plan_route(Some(user), &catalog(), "Plaza Bolívar").unwrap();
        assert_eq!(
            route,
            RouteRequest {
                user_lat: 8.29,
                user_lon: -62.72,
                dest_lat: 10.5,
                dest_lon: -66.9,
            }
        );
    }

    #[test]
    fn test_route_errors() {
        let user = Coordinate::new(8.29, -62.72).unwrap();
        assert_eq!(plan_route(Some(user), &catalog(), "  "), Err(RouteError::NoSelection));
        assert_eq!(
            plan_route(None, &catalog(), "Plaza Bolívar"),
            Err(RouteError::NoUserLocation)
        );
        assert_eq!(
            plan_route(Some(user), &catalog(), "Atlantis"),
            Err(RouteError::DestinationNotFound("Atlantis".to_string()))
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"[{"name":"A","lat":1.0,"lon":1.0},{"name":"A","lat":2.0,"lon":2.0}]"#;
        assert!(matches!(
            DestinationCatalog::from_json(json),
            Err(CatalogError::DuplicateName(name)) if name == "A"
        ));
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let json = r#"[{"name":"A","lat":95.0,"lon":1.0}]"#;
        assert!(matches!(
            DestinationCatalog::from_json(json),
            Err(CatalogError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = DestinationCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.all()[1].name, "Orinokia Mall");
        assert!(catalog.find("Orinokia Mall").is_some());
        assert!(catalog.find("orinokia mall").is_none());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            DestinationCatalog::load("/nonexistent/destinations.json"),
            Err(CatalogError::ReadError(_))
        ));
    }
}
