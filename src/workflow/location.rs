use std::fmt;

use anyhow::{ensure, Result};
use geo::{Polygon, Rect, coord};
use serde::Serialize;

/// A zone to process: an administrative identifier or a lat/lon bounding box.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Location {
    Id(String),
    BBox {
        lat_min: f64,
        lon_min: f64,
        lat_max: f64,
        lon_max: f64,
    },
}

impl Location {
    /// Bounding box from `[lat_min, lon_min, lat_max, lon_max]`.
    pub fn bbox(values: &[f64]) -> Result<Self> {
        ensure!(values.len() == 4, "a bounding box needs 4 values, got {}", values.len());
        ensure!(values.iter().all(|v| v.is_finite()), "bounding box values must be finite");
        let [lat_min, lon_min, lat_max, lon_max] = [values[0], values[1], values[2], values[3]];
        ensure!(lat_min < lat_max && lon_min < lon_max, "bounding box {values:?} is empty");
        ensure!((-90.0..=90.0).contains(&lat_min) && (-90.0..=90.0).contains(&lat_max), "latitude out of range in {values:?}");
        ensure!((-180.0..=180.0).contains(&lon_min) && (-180.0..=180.0).contains(&lon_max), "longitude out of range in {values:?}");
        Ok(Self::BBox { lat_min, lon_min, lat_max, lon_max })
    }

    /// Canonical string id; bounding boxes join their four numbers with `_`.
    pub fn id(&self) -> String {
        match self {
            Self::Id(id) => id.clone(),
            Self::BBox { lat_min, lon_min, lat_max, lon_max } => {
                format!("{lat_min}_{lon_min}_{lat_max}_{lon_max}")
            }
        }
    }

    /// The box as a WGS84 lon/lat rectangle, for bounding-box locations.
    pub fn rect(&self) -> Option<Rect<f64>> {
        match *self {
            Self::Id(_) => None,
            Self::BBox { lat_min, lon_min, lat_max, lon_max } => Some(Rect::new(
                coord! { x: lon_min, y: lat_min },
                coord! { x: lon_max, y: lat_max },
            )),
        }
    }

    pub fn polygon(&self) -> Option<Polygon<f64>> {
        self.rect().map(|r| r.to_polygon())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.id()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_id_joins_values() {
        let loc = Location::bbox(&[45.1, 1.2, 45.3, 1.0 + 0.5]).unwrap();
        assert_eq!(loc.id(), "45.1_1.2_45.3_1.5");
        assert_eq!(Location::Id("Vannes".into()).id(), "Vannes");
    }

    #[test]
    fn bbox_rejects_bad_shapes() {
        assert!(Location::bbox(&[1.0, 2.0, 3.0]).is_err());
        assert!(Location::bbox(&[3.0, 2.0, 1.0, 4.0]).is_err());
        assert!(Location::bbox(&[95.0, 2.0, 96.0, 4.0]).is_err());
    }

    #[test]
    fn rect_is_lon_lat() {
        let r = Location::bbox(&[10.0, 20.0, 11.0, 21.0]).unwrap().rect().unwrap();
        assert_eq!(r.min(), coord! { x: 20.0, y: 10.0 });
        assert_eq!(r.max(), coord! { x: 21.0, y: 11.0 });
    }
}
