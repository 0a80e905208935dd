mod bbox;
mod proj;
mod wkb;

pub(crate) use bbox::{build_index, query, BoundingBox};
pub use bbox::merge_rects;
pub use proj::{is_geographic, is_supported, utm_srid_for, Reprojector, WGS84};
pub use wkb::{from_wkb, to_wkb};

use geo::{BooleanOps, BoundingRect, Geometry, HasDimensions, MultiPolygon, Polygon, Rect};

/// Polygonal content of a geometry, or `None` for points and lines.
pub fn polygonal(geom: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geom {
        Geometry::Polygon(p) => Some(MultiPolygon(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon(vec![t.to_polygon()])),
        Geometry::GeometryCollection(gc) => {
            let parts: Vec<Polygon<f64>> = gc.0.iter()
                .filter_map(polygonal)
                .flat_map(|mp| mp.0)
                .collect();
            (!parts.is_empty()).then_some(MultiPolygon(parts))
        }
        _ => None,
    }
}

/// Bounding rectangle of a geometry, ignoring empty geometries.
pub fn bounds(geom: &Geometry<f64>) -> Option<Rect<f64>> {
    if geom.is_empty() { None } else { geom.bounding_rect() }
}

/// Union of many polygons, merged pairwise to keep intermediate shapes small.
pub fn union_all(shapes: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    let mut layer = shapes;
    while layer.len() > 1 {
        layer = layer.chunks(2)
            .map(|pair| match pair {
                [a, b] => a.union(b),
                [a] => a.clone(),
                _ => MultiPolygon(vec![]),
            })
            .collect();
    }
    layer.pop().unwrap_or_else(|| MultiPolygon(vec![]))
}
