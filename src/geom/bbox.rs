use geo::Rect;
use rstar::{RTree, RTreeObject, AABB};

/// A bounding box in an R-tree, associated with a row of a table by index.
#[derive(Debug, Clone)]
pub(crate) struct BoundingBox {
    idx: usize, // Row index of the corresponding geometry
    bbox: Rect<f64>,
}

impl BoundingBox {
    pub(crate) fn new(idx: usize, bbox: Rect<f64>) -> Self {
        Self { idx, bbox }
    }

    /// Get the index of the corresponding geometry.
    pub(crate) fn idx(&self) -> usize { self.idx }
}

impl RTreeObject for BoundingBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// Bulk-load an R-tree from `(row, bbox)` pairs.
pub(crate) fn build_index(boxes: impl IntoIterator<Item = (usize, Rect<f64>)>) -> RTree<BoundingBox> {
    RTree::bulk_load(
        boxes.into_iter()
            .map(|(idx, bbox)| BoundingBox::new(idx, bbox))
            .collect()
    )
}

/// Row indices whose boxes intersect `rect`.
pub(crate) fn query(tree: &RTree<BoundingBox>, rect: &Rect<f64>) -> Vec<usize> {
    let envelope = AABB::from_corners(rect.min().into(), rect.max().into());
    tree.locate_in_envelope_intersecting(&envelope)
        .map(|b| b.idx())
        .collect()
}

/// Smallest rectangle covering both inputs.
pub fn merge_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        geo::Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
        geo::Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
    )
}
