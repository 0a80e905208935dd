//! GeoJSON FeatureCollections to and from [`GeoTable`]s.

use std::io::Write;

use anyhow::{anyhow, bail, Context, Result};
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use serde_json::{json, Map, Value as Json};

use crate::geom::WGS84;
use crate::store::{ColumnDef, ColumnType, GeoTable, Schema, Value};

/// Column receiving feature geometries on read.
pub(crate) const GEOMETRY_COLUMN: &str = "the_geom";

fn coord_json(c: &Coord<f64>) -> Json { json!([c.x, c.y]) }

fn line_json(ls: &LineString<f64>) -> Json {
    Json::Array(ls.coords().map(coord_json).collect())
}

fn polygon_json(p: &Polygon<f64>) -> Json {
    if p.exterior().0.is_empty() {
        return json!([]);
    }
    Json::Array(std::iter::once(p.exterior()).chain(p.interiors()).map(line_json).collect())
}

/// Encode a geometry as a GeoJSON geometry object.
pub(crate) fn geometry_to_json(geom: &Geometry<f64>) -> Json {
    match geom {
        Geometry::Point(p) => json!({ "type": "Point", "coordinates": coord_json(&p.0) }),
        Geometry::Line(l) => json!({ "type": "LineString", "coordinates": [coord_json(&l.start), coord_json(&l.end)] }),
        Geometry::LineString(ls) => json!({ "type": "LineString", "coordinates": line_json(ls) }),
        Geometry::Polygon(p) => json!({ "type": "Polygon", "coordinates": polygon_json(p) }),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": mp.0.iter().map(|p| coord_json(&p.0)).collect::<Vec<_>>(),
        }),
        Geometry::MultiLineString(mls) => json!({
            "type": "MultiLineString",
            "coordinates": mls.0.iter().map(line_json).collect::<Vec<_>>(),
        }),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.0.iter().map(polygon_json).collect::<Vec<_>>(),
        }),
        Geometry::GeometryCollection(gc) => json!({
            "type": "GeometryCollection",
            "geometries": gc.0.iter().map(geometry_to_json).collect::<Vec<_>>(),
        }),
        Geometry::Rect(r) => geometry_to_json(&Geometry::Polygon(r.to_polygon())),
        Geometry::Triangle(t) => geometry_to_json(&Geometry::Polygon(t.to_polygon())),
    }
}

fn parse_coord(v: &Json) -> Result<Coord<f64>> {
    let arr = v.as_array().ok_or_else(|| anyhow!("position must be an array"))?;
    match arr.as_slice() {
        [x, y, ..] => Ok(Coord {
            x: x.as_f64().ok_or_else(|| anyhow!("x must be a number"))?,
            y: y.as_f64().ok_or_else(|| anyhow!("y must be a number"))?,
        }),
        _ => bail!("position needs at least 2 numbers"),
    }
}

fn parse_array<'a>(v: &'a Json, what: &str) -> Result<&'a Vec<Json>> {
    v.as_array().ok_or_else(|| anyhow!("{what} must be an array"))
}

fn parse_line(v: &Json) -> Result<LineString<f64>> {
    Ok(LineString(parse_array(v, "line")?.iter().map(parse_coord).collect::<Result<_>>()?))
}

fn parse_ring(v: &Json) -> Result<LineString<f64>> {
    let mut ring = parse_line(v)?;
    ring.close();
    Ok(ring)
}

fn parse_polygon(v: &Json) -> Result<Polygon<f64>> {
    let rings = parse_array(v, "polygon")?;
    match rings.split_first() {
        None => Ok(Polygon::new(LineString(vec![]), vec![])),
        Some((exterior, interiors)) => Ok(Polygon::new(
            parse_ring(exterior)?,
            interiors.iter().map(parse_ring).collect::<Result<_>>()?,
        )),
    }
}

/// Decode a GeoJSON geometry object.
pub(crate) fn geometry_from_json(v: &Json) -> Result<Geometry<f64>> {
    let kind = v["type"].as_str().ok_or_else(|| anyhow!("geometry has no type"))?;
    if kind == "GeometryCollection" {
        let parts = parse_array(&v["geometries"], "geometries")?
            .iter()
            .map(geometry_from_json)
            .collect::<Result<Vec<_>>>()?;
        return Ok(Geometry::GeometryCollection(GeometryCollection(parts)));
    }

    let coords = &v["coordinates"];
    Ok(match kind {
        "Point" => Geometry::Point(Point(parse_coord(coords)?)),
        "LineString" => Geometry::LineString(parse_line(coords)?),
        "Polygon" => Geometry::Polygon(parse_polygon(coords)?),
        "MultiPoint" => Geometry::MultiPoint(MultiPoint(
            parse_array(coords, "coordinates")?.iter().map(|c| parse_coord(c).map(Point)).collect::<Result<_>>()?,
        )),
        "MultiLineString" => Geometry::MultiLineString(MultiLineString(
            parse_array(coords, "coordinates")?.iter().map(parse_line).collect::<Result<_>>()?,
        )),
        "MultiPolygon" => Geometry::MultiPolygon(MultiPolygon(
            parse_array(coords, "coordinates")?.iter().map(parse_polygon).collect::<Result<_>>()?,
        )),
        other => bail!("unsupported geometry type '{other}'"),
    })
}

/// SRID named by a legacy `crs` member, e.g. `EPSG:2154` or `urn:ogc:def:crs:EPSG::2154`.
fn parse_crs(doc: &Json) -> Option<i32> {
    let name = doc["crs"]["properties"]["name"].as_str()?;
    if name.ends_with("CRS84") {
        return Some(WGS84);
    }
    name.rsplit(':').next()?.parse().ok()
}

fn property_type(v: &Json) -> Option<ColumnType> {
    match v {
        Json::Null => None,
        Json::Bool(_) => Some(ColumnType::Boolean),
        Json::Number(n) if n.is_i64() => Some(ColumnType::BigInt),
        Json::Number(_) => Some(ColumnType::Double),
        _ => Some(ColumnType::Text),
    }
}

fn property_value(v: &Json) -> Value {
    match v {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n.as_i64().map(Value::Int).unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN))),
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Read a FeatureCollection into a table.
///
/// Property columns appear in first-seen order with types unified across
/// features; geometries land in `the_geom`. The SRID is taken from a `crs`
/// member when present, WGS84 otherwise.
pub(crate) fn read_geojson(bytes: &[u8]) -> Result<GeoTable> {
    let doc: Json = serde_json::from_slice(bytes).context("[io::geojson] invalid JSON")?;
    if doc["type"].as_str() != Some("FeatureCollection") {
        bail!("[io::geojson] expected a FeatureCollection");
    }
    let features = parse_array(&doc["features"], "features").context("[io::geojson]")?;

    let mut keys: Vec<&str> = Vec::new();
    for feature in features {
        let Some(props) = feature["properties"].as_object() else { continue };
        for key in props.keys() {
            if key != GEOMETRY_COLUMN && !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
    }
    let mut columns: Vec<ColumnDef> = vec![ColumnDef::new(GEOMETRY_COLUMN, ColumnType::Geometry)];
    for key in keys {
        // Keys that are null everywhere are text.
        let ty = features.iter()
            .filter_map(|f| property_type(&f["properties"][key]))
            .reduce(|a, b| a.unify(b).unwrap_or(ColumnType::Text))
            .unwrap_or(ColumnType::Text);
        columns.push(ColumnDef::new(key, ty));
    }

    let rows = features.iter()
        .enumerate()
        .map(|(i, feature)| -> Result<Vec<Value>> {
            let geom = match &feature["geometry"] {
                Json::Null => Value::Null,
                g => Value::geometry(&geometry_from_json(g).with_context(|| format!("[io::geojson] feature {i}"))?),
            };
            let mut row = vec![geom];
            row.extend(columns.iter().skip(1).map(|c| property_value(&feature["properties"][c.name.as_str()])));
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;

    GeoTable::from_rows(Schema::new(columns)?, rows, Some(parse_crs(&doc).unwrap_or(WGS84)))
}

fn json_value(v: &Value) -> Json {
    match v {
        Value::Null | Value::Blob(_) => Json::Null,
        Value::Int(i) => json!(i),
        Value::Float(f) if f.is_finite() => json!(f),
        Value::Float(_) => Json::Null,
        Value::Text(s) => json!(s),
        Value::Bool(b) => json!(b),
    }
}

/// Write a table as a FeatureCollection.
///
/// The first geometry column is the feature geometry; other geometry
/// columns are not written. A `crs` member is added for non-WGS84 tables.
pub(crate) fn write_geojson(table: &GeoTable, out: impl Write) -> Result<()> {
    let geom_col = table.schema().geometry_column();
    let geoms = match geom_col {
        Some(col) => table.geometries(col)?,
        None => vec![None; table.height()],
    };
    let props: Vec<(&str, Vec<Value>)> = table.schema().columns().iter()
        .filter(|c| c.ty != ColumnType::Geometry)
        .map(|c| -> Result<(&str, Vec<Value>)> { Ok((c.name.as_str(), table.column_values(&c.name)?)) })
        .collect::<Result<_>>()?;

    let features: Vec<Json> = geoms.iter()
        .enumerate()
        .map(|(i, g)| {
            let properties: Map<String, Json> = props.iter()
                .map(|(name, values)| (name.to_string(), json_value(&values[i])))
                .collect();
            json!({
                "type": "Feature",
                "geometry": g.as_ref().map_or(Json::Null, geometry_to_json),
                "properties": properties,
            })
        })
        .collect();

    let mut doc = json!({ "type": "FeatureCollection", "features": features });
    if let Some(srid) = table.srid().filter(|s| *s != WGS84) {
        doc["crs"] = json!({ "type": "name", "properties": { "name": format!("urn:ogc:def:crs:EPSG::{srid}") } });
    }
    serde_json::to_writer(out, &doc).context("[io::geojson] failed to serialize GeoJSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn read_infers_property_types() {
        let doc = json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "EPSG:2154" } },
            "features": [
                { "type": "Feature", "geometry": { "type": "Point", "coordinates": [1.0, 2.0] },
                  "properties": { "id_zone": "A", "pop": 3, "h": null } },
                { "type": "Feature", "geometry": null,
                  "properties": { "id_zone": "B", "pop": 4.5, "h": 7 } },
            ]
        });
        let table = read_geojson(doc.to_string().as_bytes()).unwrap();
        assert_eq!(table.srid(), Some(2154));
        assert_eq!(table.schema().names().collect::<Vec<_>>(), vec!["the_geom", "id_zone", "pop", "h"]);
        assert_eq!(table.schema().get("pop").unwrap().ty, ColumnType::Double);
        assert_eq!(table.schema().get("h").unwrap().ty, ColumnType::BigInt);
        assert_eq!(table.value(1, "pop").unwrap(), Value::Float(4.5));
        assert_eq!(table.value(0, "h").unwrap(), Value::Null);
        assert_eq!(table.geometries("the_geom").unwrap()[1], None);
    }

    #[test]
    fn write_then_read_keeps_geometry_and_properties() {
        let schema = Schema::of(&[("id", ColumnType::BigInt), ("the_geom", ColumnType::Geometry)]).unwrap();
        let square = Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)]);
        let table = GeoTable::from_rows(schema, vec![vec![Value::Int(9), Value::geometry(&square)]], Some(2154)).unwrap();

        let mut buf = Vec::new();
        write_geojson(&table, &mut buf).unwrap();
        let back = read_geojson(&buf).unwrap();
        assert_eq!(back.srid(), Some(2154));
        assert_eq!(back.value(0, "id").unwrap(), Value::Int(9));
        assert_eq!(back.main_geometries().unwrap()[0], Some(square));
    }

    #[test]
    fn unknown_geometry_type_fails() {
        let doc = json!({ "type": "FeatureCollection", "features": [
            { "type": "Feature", "geometry": { "type": "Circle", "coordinates": [] }, "properties": {} }
        ]});
        assert!(read_geojson(doc.to_string().as_bytes()).is_err());
    }
}
