use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, Geometry, MapCoords};
use proj4rs::{proj::Proj as Proj4, transform::transform};

/// Geographic WGS84 lon/lat.
pub const WGS84: i32 = 4326;

/// Build the PROJ.4 string for a supported EPSG code.
/// Returns the string and whether the CRS is geographic (degrees).
fn proj4_for(srid: i32) -> Result<(String, bool)> {
    let def = match srid {
        4326 => ("+proj=longlat +datum=WGS84 +no_defs +type=crs".to_string(), true),
        4269 => ("+proj=longlat +datum=NAD83 +no_defs +type=crs".to_string(), true),
        3857 => (
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs +type=crs"
                .to_string(),
            false,
        ),
        2154 => (
            "+proj=lcc +lat_0=46.5 +lon_0=3 +lat_1=49 +lat_2=44 +x_0=700000 +y_0=6600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs +type=crs"
                .to_string(),
            false,
        ),
        32601..=32660 => (
            format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs +type=crs", srid - 32600),
            false,
        ),
        32701..=32760 => (
            format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs +type=crs", srid - 32700),
            false,
        ),
        26901..=26923 => (
            format!("+proj=utm +zone={} +datum=NAD83 +units=m +no_defs +type=crs", srid - 26900),
            false,
        ),
        other => bail!("[geom::proj] unsupported SRID {other}"),
    };
    Ok(def)
}

/// True if the SRID is known to the reprojection catalogue.
pub fn is_supported(srid: i32) -> bool {
    proj4_for(srid).is_ok()
}

/// True if the SRID is a geographic (degree-based) CRS.
pub fn is_geographic(srid: i32) -> bool {
    matches!(proj4_for(srid), Ok((_, true)))
}

/// Pick the WGS84 UTM zone containing a lon/lat point.
pub fn utm_srid_for(lon: f64, lat: f64) -> i32 {
    let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60);
    if lat >= 0.0 { 32600 + zone } else { 32700 + zone }
}

/// A prepared transformation between two SRIDs.
pub struct Reprojector {
    from: Proj4,
    to: Proj4,
    from_geographic: bool,
    to_geographic: bool,
}

impl Reprojector {
    pub fn new(from_srid: i32, to_srid: i32) -> Result<Self> {
        let (from_def, from_geographic) = proj4_for(from_srid)?;
        let (to_def, to_geographic) = proj4_for(to_srid)?;

        let from = Proj4::from_proj_string(&from_def)
            .with_context(|| anyhow!("failed to build source PROJ.4: {from_def}"))?;
        let to = Proj4::from_proj_string(&to_def)
            .with_context(|| anyhow!("failed to build target PROJ.4: {to_def}"))?;

        Ok(Self { from, to, from_geographic, to_geographic })
    }

    /// Transform one coordinate; geographic CRSs are handled in degrees.
    pub fn coord(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        let mut point = if self.from_geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        transform(&self.from, &self.to, &mut point)
            .map_err(|e| anyhow!("[geom::proj] CRS transform failed for ({}, {}): {e}", coord.x, coord.y))?;
        Ok(if self.to_geographic {
            Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
        } else {
            Coord { x: point.0, y: point.1 }
        })
    }

    pub fn geometry(&self, geom: &Geometry<f64>) -> Result<Geometry<f64>> {
        geom.try_map_coords(|c| self.coord(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    #[test]
    fn utm_zone_selection() {
        assert_eq!(utm_srid_for(2.35, 48.85), 32631);
        assert_eq!(utm_srid_for(-70.6, -33.4), 32719);
        assert_eq!(utm_srid_for(180.0, 10.0), 32660);
    }

    #[test]
    fn catalogue() {
        assert!(is_supported(2154));
        assert!(is_geographic(4326));
        assert!(!is_geographic(32631));
        assert!(!is_supported(9999));
        assert!(Reprojector::new(4326, 9999).is_err());
    }

    #[test]
    fn wgs84_to_utm_and_back() {
        let forward = Reprojector::new(4326, 32631).unwrap();
        let back = Reprojector::new(32631, 4326).unwrap();
        let p = Geometry::Point(Point::new(3.0, 45.0));

        let projected = forward.geometry(&p).unwrap();
        let Geometry::Point(q) = projected else { panic!("expected point") };
        // Central meridian of zone 31 maps to the false easting.
        assert!((q.x() - 500_000.0).abs() < 1.0);

        let Geometry::Point(r) = back.geometry(&Geometry::Point(q)).unwrap() else { panic!("expected point") };
        assert!((r.x() - 3.0).abs() < 1e-6);
        assert!((r.y() - 45.0).abs() < 1e-6);
    }
}
