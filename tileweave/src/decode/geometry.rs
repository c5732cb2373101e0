//! Vector geometry payloads.
//!
//! Geometry arrives as JSON in one of two shapes:
//!
//! ```text
//! { "layers": [ { "name": "roads", "features": [ ... ] } ] }
//! { "type": "FeatureCollection", "features": [ ... ] }
//! ```
//!
//! A bare feature collection becomes a single layer named `default`.
//! Positions are `[x, y]` pairs in tile-local space.

use serde::{Deserialize, Serialize};

use super::DecodeError;

/// Layer name given to a bare feature collection.
pub const DEFAULT_LAYER_NAME: &str = "default";

/// A position in tile-local space.
pub type Position = [f64; 2];

/// Geometry of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    /// Total number of positions in this geometry.
    pub fn vertex_count(&self) -> usize {
        match self {
            Geometry::Point(_) => 1,
            Geometry::MultiPoint(points) | Geometry::LineString(points) => points.len(),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().map(Vec::len).sum()
            }
            Geometry::MultiPolygon(polygons) => polygons
                .iter()
                .flat_map(|rings| rings.iter().map(Vec::len))
                .sum(),
        }
    }
}

/// One vector feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A named group of features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorLayer {
    pub name: String,
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// A parsed vector-feature document for one tile.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct VectorDocument {
    pub layers: Vec<VectorLayer>,
}

impl VectorDocument {
    /// Looks up a layer by name.
    pub fn layer(&self, name: &str) -> Option<&VectorLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Number of features across all layers.
    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_count() == 0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Layered {
        layers: Vec<VectorLayer>,
    },
    Collection {
        #[serde(rename = "type")]
        kind: String,
        features: Vec<Feature>,
    },
}

/// Parses a geometry payload.
pub fn parse_geometry(bytes: &[u8]) -> Result<VectorDocument, DecodeError> {
    let raw: RawDocument =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Geometry(e.to_string()))?;
    match raw {
        RawDocument::Layered { layers } => Ok(VectorDocument { layers }),
        RawDocument::Collection { kind, features } => {
            if kind != "FeatureCollection" {
                return Err(DecodeError::Geometry(format!(
                    "unsupported document type '{}'",
                    kind
                )));
            }
            Ok(VectorDocument {
                layers: vec![VectorLayer {
                    name: DEFAULT_LAYER_NAME.to_string(),
                    features,
                }],
            })
        }
    }
}
