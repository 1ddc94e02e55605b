//! Concave hull by edge digging (Park & Oh, 2012).
//!
//! Starts from geo's convex hull and repeatedly replaces the longest boundary
//! edge `(a, b)` with `(a, p), (p, b)` for the nearest inner point `p` while
//! `|ab| / min(|pa|, |pb|)` exceeds a threshold derived from `tightness`.
//! A dig is refused when it would cut off another point or make the boundary
//! self-intersect, so every input point stays inside or on the hull.
//!
//! Predicates go through geo's robust kernel, so lattice input needs no
//! tolerance.

use geo::kernels::{Kernel, Orientation, RobustKernel};
use geo::{
    Area, BoundingRect, ConvexHull, Coord, EuclideanDistance, Intersects, Line, LineString,
    MultiPoint, Polygon, Rect, Triangle,
};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Dig threshold at tightness 0. Tightness 1 digs whenever the result stays valid.
pub const DIG_SCALE: f64 = 20.0;

const NONE: usize = usize::MAX;

/// Concave hull of `points` at `tightness` (1.0 tightest, 0.0 convex).
///
/// Fewer than three distinct or all-collinear points yield their bounding
/// rectangle grown by `padding` degrees.
pub fn concave_hull(points: &[Coord<f64>], tightness: f64, padding: f64) -> Polygon<f64> {
    let points = dedup(points);
    if points.len() < 3 {
        return padded_envelope(&points, padding);
    }

    let Some(hull) = convex_ring(&points) else {
        return padded_envelope(&points, padding);
    };

    let threshold = (1.0 - tightness.clamp(0.0, 1.0)) * DIG_SCALE;
    let ring = dig(&points, hull, threshold);

    Polygon::new(
        LineString::new(ring.iter().map(|&i| points[i]).collect()),
        vec![],
    )
}

fn lex_cmp(a: &Coord<f64>, b: &Coord<f64>) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

fn dedup(points: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let mut sorted: Vec<Coord<f64>> = points
        .iter()
        .copied()
        .filter(|c| c.x.is_finite() && c.y.is_finite())
        .collect();
    sorted.sort_by(lex_cmp);
    sorted.dedup();
    sorted
}

fn padded_envelope(points: &[Coord<f64>], padding: f64) -> Polygon<f64> {
    let pad = padding.max(1e-6);
    let rect = MultiPoint::from(points.to_vec())
        .bounding_rect()
        .unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }));
    let (min, max) = (rect.min(), rect.max());
    Rect::new(
        Coord {
            x: min.x - pad,
            y: min.y - pad,
        },
        Coord {
            x: max.x + pad,
            y: max.y + pad,
        },
    )
    .to_polygon()
}

/// Counter-clockwise convex hull as indices into the sorted `points`,
/// collinear boundary points excluded. `None` when the hull has no area.
fn convex_ring(points: &[Coord<f64>]) -> Option<Vec<usize>> {
    let hull = MultiPoint::from(points.to_vec()).convex_hull();
    if hull.unsigned_area() == 0.0 {
        return None;
    }

    let coords = &hull.exterior().0;
    let ring: Vec<usize> = coords[..coords.len() - 1]
        .iter()
        .filter_map(|c| points.binary_search_by(|p| lex_cmp(p, c)).ok())
        .collect();
    (ring.len() >= 3).then_some(ring)
}

fn interior_side(a: Coord<f64>, b: Coord<f64>, q: Coord<f64>) -> bool {
    RobustKernel::orient2d(a, b, q) == Orientation::CounterClockwise
}

/// Boundary as a linked ring over point indices.
struct Ring {
    next: Vec<usize>,
    start: usize,
}

impl Ring {
    fn new(n: usize, hull: &[usize]) -> Self {
        let mut next = vec![NONE; n];
        for (k, &i) in hull.iter().enumerate() {
            let j = hull[(k + 1) % hull.len()];
            next[i] = j;
        }
        Self {
            next,
            start: hull[0],
        }
    }

    fn contains(&self, i: usize) -> bool {
        self.next[i] != NONE
    }

    fn insert_between(&mut self, a: usize, p: usize, b: usize) {
        self.next[a] = p;
        self.next[p] = b;
    }

    fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        let mut u = self.start;
        loop {
            let v = self.next[u];
            edges.push((u, v));
            u = v;
            if u == self.start {
                break;
            }
        }
        edges
    }

    fn vertices(&self) -> Vec<usize> {
        self.edges().into_iter().map(|(u, _)| u).collect()
    }
}

/// Heap entry ordered by edge length; positive f64 bit patterns sort like the values.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct EdgeByLength(u64, usize, usize);

impl EdgeByLength {
    fn new(points: &[Coord<f64>], a: usize, b: usize) -> Self {
        Self(points[a].euclidean_distance(&points[b]).to_bits(), a, b)
    }
}

fn dig(points: &[Coord<f64>], hull: Vec<usize>, threshold: f64) -> Vec<usize> {
    let mut ring = Ring::new(points.len(), &hull);
    splice_collinear(points, &mut ring);

    let mut heap: BinaryHeap<EdgeByLength> = ring
        .edges()
        .into_iter()
        .map(|(a, b)| EdgeByLength::new(points, a, b))
        .collect();

    while let Some(EdgeByLength(_, a, b)) = heap.pop() {
        if ring.next[a] != b {
            continue;
        }
        let (pa, pb) = (points[a], points[b]);
        let edge_len = pa.euclidean_distance(&pb);
        if edge_len == 0.0 {
            continue;
        }
        let edge = Line::new(pa, pb);

        // Nearest inner point strictly on the interior side of the edge.
        let candidate = (0..points.len())
            .filter(|&q| !ring.contains(q) && interior_side(pa, pb, points[q]))
            .map(|q| (q, points[q].euclidean_distance(&edge)))
            .min_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
        let Some((p, _)) = candidate else {
            continue;
        };
        let pp = points[p];

        let decision = pp.euclidean_distance(&pa).min(pp.euclidean_distance(&pb));
        if decision <= 0.0 || edge_len / decision <= threshold {
            continue;
        }

        let dug = Triangle::new(pa, pp, pb);
        let cuts_off_point =
            (0..points.len()).any(|q| q != p && !ring.contains(q) && dug.intersects(&points[q]));
        if cuts_off_point {
            continue;
        }

        let (left, right) = (Line::new(pa, pp), Line::new(pp, pb));
        let crosses_boundary = ring.edges().into_iter().any(|(u, v)| {
            let existing = Line::new(points[u], points[v]);
            (u != a && v != a && left.intersects(&existing))
                || (u != b && v != b && right.intersects(&existing))
        });
        if crosses_boundary {
            continue;
        }

        ring.insert_between(a, p, b);
        heap.push(EdgeByLength::new(points, a, p));
        heap.push(EdgeByLength::new(points, p, b));
    }

    ring.vertices()
}

/// Make points lying on a hull edge explicit vertices of that edge.
fn splice_collinear(points: &[Coord<f64>], ring: &mut Ring) {
    for (a, b) in ring.edges() {
        let edge = Line::new(points[a], points[b]);
        let mut on_edge: Vec<(f64, usize)> = (0..points.len())
            .filter(|&q| !ring.contains(q) && edge.intersects(&points[q]))
            .map(|q| (points[a].euclidean_distance(&points[q]), q))
            .collect();
        on_edge.sort_by(|x, y| x.0.total_cmp(&y.0));

        let mut prev = a;
        for (_, q) in on_edge {
            ring.insert_between(prev, q, b);
            prev = q;
        }
    }
}
