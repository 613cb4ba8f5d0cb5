//! GeoJSON types exchanged with the chart converter and the tiling tool.
//!
//! Only the parts of RFC 7946 the pipeline needs are modelled. Positions
//! keep any extra ordinates (soundings carry depth as a third value) so that
//! features which are not clipped pass through untouched.

use geo::{coord, Coord, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GeoJSON position: `[lon, lat]` or `[lon, lat, z]`.
pub type Position = Vec<f64>;

/// A GeoJSON FeatureCollection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection {
    /// Type identifier (always "FeatureCollection").
    #[serde(rename = "type")]
    pub type_: String,

    /// Array of features.
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Create a new empty FeatureCollection.
    pub fn new() -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            features: Vec::new(),
        }
    }

    /// Add multiple features to the collection.
    pub fn with_features(mut self, features: Vec<Feature>) -> Self {
        self.features.extend(features);
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// A GeoJSON Feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Type identifier (always "Feature").
    #[serde(rename = "type")]
    pub type_: String,

    /// Optional feature identifier (string or number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// The geometry; `null` is allowed by GeoJSON.
    #[serde(default)]
    pub geometry: Option<Geometry>,

    /// Feature attributes.
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,

    /// Per-feature tippecanoe directives (zoom range and target layer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tippecanoe: Option<TippecanoeHints>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            type_: "Feature".to_string(),
            id: None,
            geometry: Some(geometry),
            properties: Some(Map::new()),
            tippecanoe: None,
        }
    }

    /// Set a property, creating the property map when it is `null`.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.as_ref().and_then(|p| p.get(key))
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(Value::as_str)
    }
}

/// Tippecanoe's per-feature extension object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TippecanoeHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

/// GeoJSON geometry types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: Position,
    },
    MultiPoint {
        coordinates: Vec<Position>,
    },
    LineString {
        coordinates: Vec<Position>,
    },
    MultiLineString {
        coordinates: Vec<Vec<Position>>,
    },
    /// Array of linear rings (first is exterior, rest are holes).
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Position>>>,
    },
    GeometryCollection {
        geometries: Vec<Geometry>,
    },
}

impl Geometry {
    /// Convert to a `geo` geometry; `None` when a position is malformed.
    pub fn to_geo(&self) -> Option<geo::Geometry<f64>> {
        Some(match self {
            Geometry::Point { coordinates } => Point::from(to_coord(coordinates)?).into(),
            Geometry::MultiPoint { coordinates } => MultiPoint::new(
                coordinates
                    .iter()
                    .map(|p| to_coord(p).map(Point::from))
                    .collect::<Option<Vec<_>>>()?,
            )
            .into(),
            Geometry::LineString { coordinates } => to_line_string(coordinates)?.into(),
            Geometry::MultiLineString { coordinates } => MultiLineString::new(
                coordinates
                    .iter()
                    .map(|l| to_line_string(l))
                    .collect::<Option<Vec<_>>>()?,
            )
            .into(),
            Geometry::Polygon { coordinates } => to_polygon(coordinates)?.into(),
            Geometry::MultiPolygon { coordinates } => MultiPolygon::new(
                coordinates
                    .iter()
                    .map(|p| to_polygon(p))
                    .collect::<Option<Vec<_>>>()?,
            )
            .into(),
            Geometry::GeometryCollection { geometries } => {
                geo::Geometry::GeometryCollection(geo::GeometryCollection::new_from(
                    geometries
                        .iter()
                        .map(Geometry::to_geo)
                        .collect::<Option<Vec<_>>>()?,
                ))
            }
        })
    }

    /// Convert from a `geo` geometry, dropping any third ordinate.
    pub fn from_geo(geometry: &geo::Geometry<f64>) -> Self {
        match geometry {
            geo::Geometry::Point(p) => Geometry::Point {
                coordinates: from_coord(p.0),
            },
            geo::Geometry::MultiPoint(mp) => Geometry::MultiPoint {
                coordinates: mp.iter().map(|p| from_coord(p.0)).collect(),
            },
            geo::Geometry::Line(line) => Geometry::LineString {
                coordinates: vec![from_coord(line.start), from_coord(line.end)],
            },
            geo::Geometry::LineString(ls) => Geometry::LineString {
                coordinates: from_line_string(ls),
            },
            geo::Geometry::MultiLineString(mls) => Geometry::MultiLineString {
                coordinates: mls.iter().map(from_line_string).collect(),
            },
            geo::Geometry::Polygon(p) => Geometry::Polygon {
                coordinates: from_polygon(p),
            },
            geo::Geometry::MultiPolygon(mp) => Geometry::MultiPolygon {
                coordinates: mp.iter().map(from_polygon).collect(),
            },
            geo::Geometry::Rect(rect) => Geometry::Polygon {
                coordinates: from_polygon(&rect.to_polygon()),
            },
            geo::Geometry::Triangle(triangle) => Geometry::Polygon {
                coordinates: from_polygon(&triangle.to_polygon()),
            },
            geo::Geometry::GeometryCollection(gc) => Geometry::GeometryCollection {
                geometries: gc.iter().map(Geometry::from_geo).collect(),
            },
        }
    }

    /// Check that every position is finite and every part has enough
    /// vertices to be drawn.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Geometry::Point { coordinates } => position_ok(coordinates),
            Geometry::MultiPoint { coordinates } => coordinates.iter().all(|p| position_ok(p)),
            Geometry::LineString { coordinates } => line_ok(coordinates),
            Geometry::MultiLineString { coordinates } => coordinates.iter().all(|l| line_ok(l)),
            Geometry::Polygon { coordinates } => polygon_ok(coordinates),
            Geometry::MultiPolygon { coordinates } => coordinates.iter().all(|p| polygon_ok(p)),
            Geometry::GeometryCollection { geometries } => {
                geometries.iter().all(Geometry::is_well_formed)
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "Point",
            Geometry::MultiPoint { .. } => "MultiPoint",
            Geometry::LineString { .. } => "LineString",
            Geometry::MultiLineString { .. } => "MultiLineString",
            Geometry::Polygon { .. } => "Polygon",
            Geometry::MultiPolygon { .. } => "MultiPolygon",
            Geometry::GeometryCollection { .. } => "GeometryCollection",
        }
    }
}

fn to_coord(position: &Position) -> Option<Coord<f64>> {
    match position.as_slice() {
        [x, y, ..] => Some(coord! { x: *x, y: *y }),
        _ => None,
    }
}

fn to_line_string(positions: &[Position]) -> Option<LineString<f64>> {
    positions
        .iter()
        .map(to_coord)
        .collect::<Option<Vec<_>>>()
        .map(LineString::new)
}

fn to_polygon(rings: &[Vec<Position>]) -> Option<Polygon<f64>> {
    let mut rings = rings.iter();
    let exterior = to_line_string(rings.next()?)?;
    let interiors = rings
        .map(|ring| to_line_string(ring))
        .collect::<Option<Vec<_>>>()?;
    Some(Polygon::new(exterior, interiors))
}

fn from_coord(c: Coord<f64>) -> Position {
    vec![c.x, c.y]
}

fn from_line_string(ls: &LineString<f64>) -> Vec<Position> {
    ls.coords().map(|c| from_coord(*c)).collect()
}

fn from_polygon(polygon: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(from_line_string)
        .collect()
}

fn position_ok(position: &Position) -> bool {
    position.len() >= 2 && position.iter().all(|v| v.is_finite())
}

fn line_ok(positions: &[Position]) -> bool {
    positions.len() >= 2 && positions.iter().all(position_ok)
}

fn polygon_ok(rings: &[Vec<Position>]) -> bool {
    !rings.is_empty() && rings.iter().all(|r| r.len() >= 4 && r.iter().all(position_ok))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ogr_output() {
        let json = r#"{
            "type": "FeatureCollection",
            "name": "SOUNDG",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },
            "features": [
                { "type": "Feature", "properties": { "DEPTH": 4.2 },
                  "geometry": { "type": "Point", "coordinates": [ -89.5, 20.5, 4.2 ] } },
                { "type": "Feature", "properties": null, "geometry": null }
            ]
        }"#;

        let fc: FeatureCollection = serde_json::from_str(json).unwrap();
        assert_eq!(fc.len(), 2);
        assert_eq!(
            fc.features[0].geometry,
            Some(Geometry::Point {
                coordinates: vec![-89.5, 20.5, 4.2]
            })
        );
        assert!(fc.features[1].geometry.is_none());
        assert!(fc.features[1].properties.is_none());
    }

    #[test]
    fn test_set_property_on_null_properties() {
        let mut feature = Feature::new(Geometry::Point {
            coordinates: vec![0.0, 0.0],
        });
        feature.properties = None;
        feature.set_property("enc_band", "coastal");
        assert_eq!(feature.property_str("enc_band"), Some("coastal"));
    }

    #[test]
    fn test_polygon_to_geo_and_back() {
        let ring = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
            vec![0.0, 1.0],
            vec![0.0, 0.0],
        ];
        let geometry = Geometry::Polygon {
            coordinates: vec![ring.clone()],
        };
        let geo = geometry.to_geo().unwrap();
        assert_eq!(Geometry::from_geo(&geo), geometry);
    }

    #[test]
    fn test_geometry_collection_to_geo() {
        let geometry = Geometry::GeometryCollection {
            geometries: vec![
                Geometry::Point {
                    coordinates: vec![0.5, 0.5, 3.0],
                },
                Geometry::LineString {
                    coordinates: vec![vec![0.0, 0.0], vec![1.0, 1.0]],
                },
            ],
        };

        let Some(geo::Geometry::GeometryCollection(gc)) = geometry.to_geo() else {
            panic!("expected a geometry collection");
        };
        assert_eq!(gc.len(), 2);
        assert!(matches!(gc[0], geo::Geometry::Point(_)));

        let broken = Geometry::GeometryCollection {
            geometries: vec![Geometry::Point {
                coordinates: vec![1.0],
            }],
        };
        assert!(broken.to_geo().is_none());
    }

    #[test]
    fn test_malformed_position_is_rejected() {
        let geometry = Geometry::LineString {
            coordinates: vec![vec![0.0, 0.0], vec![1.0]],
        };
        assert!(geometry.to_geo().is_none());
        assert!(!geometry.is_well_formed());
    }

    #[test]
    fn test_well_formed_checks_finite_and_ring_length() {
        let nan_point = Geometry::Point {
            coordinates: vec![f64::NAN, 1.0],
        };
        assert!(!nan_point.is_well_formed());

        let short_ring = Geometry::Polygon {
            coordinates: vec![vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 0.0]]],
        };
        assert!(!short_ring.is_well_formed());
    }

    #[test]
    fn test_tippecanoe_hints_serialize_compactly() {
        let feature = Feature::new(Geometry::Point {
            coordinates: vec![1.0, 2.0],
        });
        let mut feature = feature;
        feature.tippecanoe = Some(TippecanoeHints {
            minzoom: Some(10),
            maxzoom: Some(11),
            layer: None,
        });
        let json = serde_json::to_string(&feature).unwrap();
        assert!(json.contains(r#""tippecanoe":{"minzoom":10,"maxzoom":11}"#));
    }
}
