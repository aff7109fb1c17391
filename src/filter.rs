//! Search filter tree as understood by the catalogue's search endpoint.
//!
//! Every node serializes to `{"type": "...", "field_name": "...", "config": ...}`,
//! combinators carry their children in `config` in the order they were given.
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const GEOMETRY_FIELD: &str = "geometry";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum SearchFilter {
    GeometryFilter {
        field_name: String,
        config: Geometry,
    },
    DateRangeFilter {
        field_name: String,
        config: DateRange,
    },
    RangeFilter {
        field_name: String,
        config: NumberRange,
    },
    StringInFilter {
        field_name: String,
        config: Vec<String>,
    },
    AndFilter {
        config: Vec<SearchFilter>,
    },
    OrFilter {
        config: Vec<SearchFilter>,
    },
    NotFilter {
        config: Box<SearchFilter>,
    },
}

impl SearchFilter {
    pub fn geometry(geometry: Geometry) -> Self {
        Self::GeometryFilter {
            field_name: GEOMETRY_FIELD.to_string(),
            config: geometry,
        }
    }

    pub fn date_range(field_name: &str, range: DateRange) -> Self {
        Self::DateRangeFilter {
            field_name: field_name.to_string(),
            config: range,
        }
    }

    pub fn range(field_name: &str, range: NumberRange) -> Self {
        Self::RangeFilter {
            field_name: field_name.to_string(),
            config: range,
        }
    }

    pub fn string_in<S: ToString>(field_name: &str, values: &[S]) -> Self {
        Self::StringInFilter {
            field_name: field_name.to_string(),
            config: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn and(filters: Vec<SearchFilter>) -> Self {
        Self::AndFilter { config: filters }
    }

    pub fn or(filters: Vec<SearchFilter>) -> Self {
        Self::OrFilter { config: filters }
    }

    pub fn not(filter: SearchFilter) -> Self {
        Self::NotFilter {
            config: Box::new(filter),
        }
    }

    /// Wire form of the filter. Non-finite range bounds are rejected, JSON would carry
    /// them as `null`.
    pub fn to_json(self: &Self) -> Result<serde_json::Value> {
        self.check_bounds()?;
        Ok(serde_json::to_value(self)?)
    }

    fn check_bounds(self: &Self) -> Result<()> {
        match self {
            Self::RangeFilter { field_name, config } => {
                let bounds = [config.gte, config.gt, config.lte, config.lt];
                if bounds.iter().flatten().all(|b| b.is_finite()) {
                    Ok(())
                } else {
                    Err(Error::Config(format!(
                        "non-finite bound in range filter on '{}'",
                        field_name
                    )))
                }
            }
            Self::AndFilter { config } | Self::OrFilter { config } => {
                config.iter().try_for_each(|f| f.check_bounds())
            }
            Self::NotFilter { config } => config.check_bounds(),
            _ => Ok(()),
        }
    }
}

/// GeoJSON geometry used by `GeometryFilter`. Coordinates are `[lon, lat]`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: [f64; 2],
    },
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

impl Geometry {
    /// Closed rectangular polygon from a west/south/east/north bounding box.
    pub fn bbox(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::Polygon {
            coordinates: vec![vec![
                [west, south],
                [east, south],
                [east, north],
                [west, north],
                [west, south],
            ]],
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct DateRange {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gte: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gt: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lte: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lt: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            gte: Some(start),
            lte: Some(end),
            ..Default::default()
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NumberRange {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gte: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lte: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lt: Option<f64>,
}

impl NumberRange {
    pub fn at_most(max: f64) -> Self {
        Self {
            lte: Some(max),
            ..Default::default()
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            gte: Some(min),
            ..Default::default()
        }
    }
}
