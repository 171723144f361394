//! Route shapes: optional geometric polylines biasing the router towards
//! the trip's intended physical trajectory.

use ahash::HashMap;
use geo::Point;

use crate::ids::{Interner, ShapeId, ShapeKind};

#[derive(Clone, Debug)]
pub struct Shape {
    pub id: ShapeId,
    pub points: Vec<Point<f64>>,
}

impl Shape {
    #[must_use]
    pub fn as_linestring(&self) -> geo::LineString<f64> {
        geo::LineString::from(self.points.clone())
    }

    /// Euclidean distance from `point` to the nearest point on this shape's
    /// polyline. Used by the router's shape-bias cost decorator; a
    /// single-point shape degenerates to point-to-point distance.
    #[must_use]
    pub fn distance_to(&self, point: Point<f64>) -> f64 {
        if self.points.len() < 2 {
            return self
                .points
                .first()
                .map_or(f64::INFINITY, |p| euclidean_distance(*p, point));
        }
        self.points
            .windows(2)
            .map(|pair| squared_distance_to_segment(pair[0], pair[1], point))
            .fold(f64::INFINITY, f64::min)
            .sqrt()
    }
}

fn euclidean_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    let (dx, dy) = (a.x() - b.x(), a.y() - b.y());
    (dx * dx + dy * dy).sqrt()
}

fn squared_distance_to_segment(from: Point<f64>, to: Point<f64>, point: Point<f64>) -> f64 {
    let (dx, dy) = (to.x() - from.x(), to.y() - from.y());
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f64::EPSILON {
        0.0
    } else {
        (((point.x() - from.x()) * dx) + ((point.y() - from.y()) * dy)) / len_sq
    }
    .clamp(0.0, 1.0);
    let proj_x = from.x() + t * dx;
    let proj_y = from.y() + t * dy;
    let (ex, ey) = (point.x() - proj_x, point.y() - proj_y);
    ex * ex + ey * ey
}

/// Shapes are looked up by shape identifier; several routes may share one.
#[derive(Debug, Default)]
pub struct ShapeMap {
    shapes: HashMap<ShapeId, Shape>,
    interner: Interner<ShapeKind>,
}

impl ShapeMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shapes: HashMap::default(),
            interner: Interner::new(),
        }
    }

    pub fn insert(&mut self, external_id: &str, points: Vec<Point<f64>>) -> ShapeId {
        let id = self.interner.intern(external_id);
        self.shapes.entry(id).or_insert(Shape { id, points });
        id
    }

    #[must_use]
    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    #[must_use]
    pub fn id_for(&self, external_id: &str) -> Option<ShapeId> {
        self.interner.get(external_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_uses_nearest_segment() {
        let shape = Shape {
            id: ShapeId::from_raw(0),
            points: vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0)],
        };
        assert!(approx::abs_diff_eq!(shape.distance_to(Point::new(50.0, 5.0)), 5.0, epsilon = 1e-9));
    }
}
