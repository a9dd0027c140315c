//! Marquee selection.
//!
//! A shape is hit when its rotated bounding box overlaps the marquee. Lines
//! are hit when either endpoint lies inside the marquee or their endpoint box
//! overlaps it. A hit on a shape held by someone else aborts the whole
//! selection so the caller never batch-locks a partial set.

use crate::geometry::{rotated_aabb, Aabb, Point};
use crate::model::{Shape, ShapeId, ShapeKind};

/// A marquee hit a shape another user holds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Shape {shape_id} is locked by {holder}")]
pub struct SelectionConflict {
    pub shape_id: ShapeId,
    pub holder: String,
}

/// Does `shape` fall under `marquee`?
pub fn hit_by_marquee(shape: &Shape, marquee: &Aabb) -> bool {
    if let ShapeKind::Line(l) = &shape.kind {
        let start = Point::new(l.x, l.y);
        let end = Point::new(l.x2, l.y2);
        return marquee.contains(start)
            || marquee.contains(end)
            || Aabb::from_corners(start, end).intersects(marquee);
    }
    rotated_aabb(shape).intersects(marquee)
}

/// Ids of every shape under `marquee`, failing on the first one held by a
/// user other than `user_id`.
pub fn shapes_in_box<'a>(
    shapes: impl IntoIterator<Item = &'a Shape>,
    marquee: &Aabb,
    user_id: &str,
) -> Result<Vec<ShapeId>, SelectionConflict> {
    let mut hits = Vec::new();
    for shape in shapes {
        if !hit_by_marquee(shape, marquee) {
            continue;
        }
        if let Some(holder) = shape.locked_by.as_deref().filter(|h| *h != user_id) {
            log::debug!("marquee by {user_id} aborted on {} held by {holder}", shape.id);
            return Err(SelectionConflict {
                shape_id: shape.id.clone(),
                holder: holder.to_string(),
            });
        }
        hits.push(shape.id.clone());
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ShapePatch, ShapeType};

    fn rect(id: &str, x: f64, y: f64, rotation: f64) -> Shape {
        let mut shape = Shape::with_defaults(ShapeType::Rectangle, id, "u", 0);
        shape.apply_patch(&ShapePatch {
            rotation: Some(rotation),
            ..ShapePatch::position(x, y)
        });
        shape
    }

    fn line(id: &str, x: f64, y: f64, x2: f64, y2: f64) -> Shape {
        let mut shape = Shape::with_defaults(ShapeType::Line, id, "u", 0);
        shape.apply_patch(&ShapePatch {
            x2: Some(x2),
            y2: Some(y2),
            ..ShapePatch::position(x, y)
        });
        shape
    }

    #[test]
    fn test_marquee_overlap() {
        let shapes = [rect("in", 10.0, 10.0, 0.0), rect("out", 500.0, 500.0, 0.0)];
        let marquee = Aabb::from_corners(Point::new(0.0, 0.0), Point::new(50.0, 50.0));
        let hits = shapes_in_box(&shapes, &marquee, "me").unwrap();
        assert_eq!(hits, vec!["in".to_string()]);
    }

    #[test]
    fn test_rotation_grows_the_hit_box() {
        // A 100x100 square at (0,0) rotated 45° pokes out to x ≈ -20.7.
        let shape = rect("r", 0.0, 0.0, 45.0);
        let marquee = Aabb::from_corners(Point::new(-25.0, 45.0), Point::new(-15.0, 55.0));
        assert!(hit_by_marquee(&shape, &marquee));
        assert!(!hit_by_marquee(&rect("flat", 0.0, 0.0, 0.0), &marquee));
    }

    #[test]
    fn test_line_endpoint_or_box() {
        let diagonal = line("l", 0.0, 0.0, 100.0, 100.0);
        let around_end = Aabb::from_corners(Point::new(90.0, 90.0), Point::new(110.0, 110.0));
        let far = Aabb::from_corners(Point::new(200.0, 0.0), Point::new(300.0, 50.0));
        assert!(hit_by_marquee(&diagonal, &around_end));
        assert!(!hit_by_marquee(&diagonal, &far));
    }

    #[test]
    fn test_foreign_lock_aborts_selection() {
        let mut held = rect("held", 20.0, 20.0, 0.0);
        held.locked_by = Some("alice".into());
        let shapes = [rect("free", 0.0, 0.0, 0.0), held];
        let marquee = Aabb::from_corners(Point::new(0.0, 0.0), Point::new(200.0, 200.0));

        let err = shapes_in_box(&shapes, &marquee, "bob").unwrap_err();
        assert_eq!(err.holder, "alice");
        assert_eq!(err.shape_id, "held");

        // The holder itself may select it.
        assert_eq!(shapes_in_box(&shapes, &marquee, "alice").unwrap().len(), 2);
    }
}
