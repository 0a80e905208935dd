//! WKB (Well-Known Binary) encoding for table geometry columns.
//!
//! Minimal 2D implementation: all OGC simple feature types, both byte orders
//! on read, little endian on write. An EWKB SRID header is tolerated and skipped.

use anyhow::{anyhow, bail, Result};
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

const WKB_POINT: u32 = 1;
const WKB_LINESTRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOINT: u32 = 4;
const WKB_MULTILINESTRING: u32 = 5;
const WKB_MULTIPOLYGON: u32 = 6;
const WKB_GEOMETRYCOLLECTION: u32 = 7;

/// WKB byte order: little endian
const WKB_LE: u8 = 1;

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

/// Encode a geometry as little-endian WKB.
pub fn to_wkb(geom: &Geometry<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    write_geometry(&mut out, geom);
    out
}

fn write_header(out: &mut Vec<u8>, ty: u32) {
    out.push(WKB_LE);
    out.extend_from_slice(&ty.to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, c: Coord<f64>) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
}

fn write_ring(out: &mut Vec<u8>, ring: &LineString<f64>) {
    out.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
    for c in ring.coords() {
        write_coord(out, *c);
    }
}

fn write_polygon_body(out: &mut Vec<u8>, poly: &Polygon<f64>) {
    // An empty exterior encodes the empty polygon (zero rings).
    if poly.exterior().0.is_empty() {
        out.extend_from_slice(&0u32.to_le_bytes());
        return;
    }
    let num_rings = (1 + poly.interiors().len()) as u32;
    out.extend_from_slice(&num_rings.to_le_bytes());
    write_ring(out, poly.exterior());
    for interior in poly.interiors() {
        write_ring(out, interior);
    }
}

fn write_geometry(out: &mut Vec<u8>, geom: &Geometry<f64>) {
    match geom {
        Geometry::Point(p) => {
            write_header(out, WKB_POINT);
            write_coord(out, p.0);
        }
        Geometry::Line(line) => {
            write_header(out, WKB_LINESTRING);
            write_ring(out, &LineString::from(vec![line.start, line.end]));
        }
        Geometry::LineString(ls) => {
            write_header(out, WKB_LINESTRING);
            write_ring(out, ls);
        }
        Geometry::Polygon(poly) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, poly);
        }
        Geometry::Rect(rect) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, &rect.to_polygon());
        }
        Geometry::Triangle(tri) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, &tri.to_polygon());
        }
        Geometry::MultiPoint(mp) => {
            write_header(out, WKB_MULTIPOINT);
            out.extend_from_slice(&(mp.0.len() as u32).to_le_bytes());
            for p in &mp.0 {
                write_geometry(out, &Geometry::Point(*p));
            }
        }
        Geometry::MultiLineString(mls) => {
            write_header(out, WKB_MULTILINESTRING);
            out.extend_from_slice(&(mls.0.len() as u32).to_le_bytes());
            for ls in &mls.0 {
                write_header(out, WKB_LINESTRING);
                write_ring(out, ls);
            }
        }
        Geometry::MultiPolygon(mp) => {
            write_header(out, WKB_MULTIPOLYGON);
            out.extend_from_slice(&(mp.0.len() as u32).to_le_bytes());
            for poly in &mp.0 {
                write_header(out, WKB_POLYGON);
                write_polygon_body(out, poly);
            }
        }
        Geometry::GeometryCollection(gc) => {
            write_header(out, WKB_GEOMETRYCOLLECTION);
            out.extend_from_slice(&(gc.0.len() as u32).to_le_bytes());
            for g in &gc.0 {
                write_geometry(out, g);
            }
        }
    }
}

/// Decode a WKB (or EWKB without Z/M) blob.
pub fn from_wkb(bytes: &[u8]) -> Result<Geometry<f64>> {
    let mut reader = Reader { bytes, pos: 0 };
    let geom = reader.geometry()?;
    if reader.pos != bytes.len() {
        bail!("[geom::wkb] {} trailing bytes after geometry", bytes.len() - reader.pos);
    }
    Ok(geom)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end)
            .ok_or_else(|| anyhow!("[geom::wkb] unexpected end of input at byte {}", self.pos))?;
        self.pos = end;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    fn u32(&mut self, le: bool) -> Result<u32> {
        let b = self.take::<4>()?;
        Ok(if le { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) })
    }

    fn f64(&mut self, le: bool) -> Result<f64> {
        let b = self.take::<8>()?;
        Ok(if le { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) })
    }

    fn coord(&mut self, le: bool) -> Result<Coord<f64>> {
        let x = self.f64(le)?;
        let y = self.f64(le)?;
        Ok(Coord { x, y })
    }

    fn ring(&mut self, le: bool) -> Result<LineString<f64>> {
        let n = self.u32(le)? as usize;
        let mut coords = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            coords.push(self.coord(le)?);
        }
        Ok(LineString::from(coords))
    }

    fn polygon_body(&mut self, le: bool) -> Result<Polygon<f64>> {
        let num_rings = self.u32(le)?;
        if num_rings == 0 {
            return Ok(Polygon::new(LineString::new(vec![]), vec![]));
        }
        let exterior = self.ring(le)?;
        let interiors = (1..num_rings)
            .map(|_| self.ring(le))
            .collect::<Result<Vec<_>>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    /// Read a nested member and check it has the expected type.
    fn member(&mut self, expected: u32) -> Result<Geometry<f64>> {
        let geom = self.geometry()?;
        let ok = matches!(
            (expected, &geom),
            (WKB_POINT, Geometry::Point(_))
                | (WKB_LINESTRING, Geometry::LineString(_))
                | (WKB_POLYGON, Geometry::Polygon(_))
        );
        if !ok {
            bail!("[geom::wkb] multi-geometry member of unexpected type (expected {expected})");
        }
        Ok(geom)
    }

    fn geometry(&mut self) -> Result<Geometry<f64>> {
        let [order] = self.take::<1>()?;
        let le = order == WKB_LE;
        let raw = self.u32(le)?;
        if raw & (EWKB_Z | EWKB_M) != 0 || (raw & 0xFFFF) > 1000 {
            bail!("[geom::wkb] only 2D geometries are supported (type code {raw:#x})");
        }
        if raw & EWKB_SRID != 0 {
            self.u32(le)?;
        }

        let geom = match raw & 0xFFFF {
            WKB_POINT => Geometry::Point(Point(self.coord(le)?)),
            WKB_LINESTRING => Geometry::LineString(self.ring(le)?),
            WKB_POLYGON => Geometry::Polygon(self.polygon_body(le)?),
            WKB_MULTIPOINT => {
                let n = self.u32(le)?;
                let mut points = Vec::new();
                for _ in 0..n {
                    if let Geometry::Point(p) = self.member(WKB_POINT)? { points.push(p); }
                }
                Geometry::MultiPoint(MultiPoint(points))
            }
            WKB_MULTILINESTRING => {
                let n = self.u32(le)?;
                let mut lines = Vec::new();
                for _ in 0..n {
                    if let Geometry::LineString(ls) = self.member(WKB_LINESTRING)? { lines.push(ls); }
                }
                Geometry::MultiLineString(MultiLineString(lines))
            }
            WKB_MULTIPOLYGON => {
                let n = self.u32(le)?;
                let mut polygons = Vec::new();
                for _ in 0..n {
                    if let Geometry::Polygon(p) = self.member(WKB_POLYGON)? { polygons.push(p); }
                }
                Geometry::MultiPolygon(MultiPolygon(polygons))
            }
            WKB_GEOMETRYCOLLECTION => {
                let n = self.u32(le)?;
                let members = (0..n)
                    .map(|_| self.geometry())
                    .collect::<Result<Vec<_>>>()?;
                Geometry::GeometryCollection(GeometryCollection(members))
            }
            other => bail!("[geom::wkb] unknown geometry type {other}"),
        };
        Ok(geom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ]
    }

    #[test]
    fn multipolygon_with_empty_part_survives() {
        let mp = MultiPolygon(vec![
            square(0.0, 0.0, 1.0),
            Polygon::new(LineString::new(vec![]), vec![]),
        ]);
        let decoded = from_wkb(&to_wkb(&Geometry::MultiPolygon(mp.clone()))).unwrap();
        assert_eq!(decoded, Geometry::MultiPolygon(mp));
    }

    #[test]
    fn reads_big_endian_point() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&2.5f64.to_be_bytes());
        bytes.extend_from_slice(&(-1.0f64).to_be_bytes());
        assert_eq!(from_wkb(&bytes).unwrap(), Geometry::Point(Point::new(2.5, -1.0)));
    }

    #[test]
    fn skips_ewkb_srid() {
        let mut bytes = vec![WKB_LE];
        bytes.extend_from_slice(&(WKB_POINT | EWKB_SRID).to_le_bytes());
        bytes.extend_from_slice(&4326u32.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        bytes.extend_from_slice(&2.0f64.to_le_bytes());
        assert_eq!(from_wkb(&bytes).unwrap(), Geometry::Point(Point::new(1.0, 2.0)));
    }

    #[test]
    fn rejects_truncated_and_3d_input() {
        let bytes = to_wkb(&Geometry::Polygon(square(0.0, 0.0, 2.0)));
        assert!(from_wkb(&bytes[..bytes.len() - 3]).is_err());

        let mut z = vec![WKB_LE];
        z.extend_from_slice(&1001u32.to_le_bytes());
        assert!(from_wkb(&z).is_err());
    }
}
