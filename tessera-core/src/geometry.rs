//! Manipulation geometry consumed by the rendering layer.
//!
//! Pure functions: pointer classification ([`detect_zone`]), anchored resize
//! ([`resize`]) and center-pivot rotation ([`rotate`]), plus the rotated
//! bounding boxes used by marquee selection.
//!
//! Hit thresholds are expressed in screen pixels and divided by the view
//! scale, so handles keep the same on-screen size at every zoom level.

use serde::{Deserialize, Serialize};

use crate::model::{Shape, ShapeKind, ShapePatch, MIN_SHAPE_SIZE};

/// Corner handle hit radius in screen pixels.
pub const CORNER_HIT_PX: f64 = 10.0;
/// Edge handle hit distance in screen pixels.
pub const EDGE_HIT_PX: f64 = 8.0;
/// Width of the rotation band outside the corners, in screen pixels.
pub const ROTATE_BAND_PX: f64 = 24.0;

// ───────────────────────────────────────────────────────────────────
// Point / Aabb
// ───────────────────────────────────────────────────────────────────

/// 2D point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Rotate this point about `pivot` by `degrees` (clockwise in screen
    /// space, y pointing down).
    pub fn rotate_about(&self, pivot: Point, degrees: f64) -> Point {
        if degrees == 0.0 {
            return *self;
        }
        let (sin, cos) = degrees.to_radians().sin_cos();
        let dx = self.x - pivot.x;
        let dy = self.y - pivot.y;
        Point {
            x: pivot.x + dx * cos - dy * sin,
            y: pivot.y + dx * sin + dy * cos,
        }
    }
}

/// Axis-aligned bounding box stored as min/max corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Aabb {
    /// Create from origin + size (design-tool convention).
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x + width,
            max_y: y + height,
        }
    }

    /// Box spanned by two arbitrary corners, e.g. a marquee drag.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            min_x: a.x.min(b.x),
            min_y: a.y.min(b.y),
            max_x: a.x.max(b.x),
            max_y: a.y.max(b.y),
        }
    }

    /// Smallest box enclosing every point.
    pub fn enclosing(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut aabb = Aabb::from_corners(*first, *first);
        for p in &points[1..] {
            aabb.min_x = aabb.min_x.min(p.x);
            aabb.min_y = aabb.min_y.min(p.y);
            aabb.max_x = aabb.max_x.max(p.x);
            aabb.max_y = aabb.max_y.max(p.y);
        }
        Some(aabb)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

// ───────────────────────────────────────────────────────────────────
// Shape frames
// ───────────────────────────────────────────────────────────────────

/// Unrotated box of a shape: `(left, top, width, height)`.
///
/// Lines report the box spanned by their endpoints.
pub fn local_box(shape: &Shape) -> (f64, f64, f64, f64) {
    match &shape.kind {
        ShapeKind::Rectangle(r) => (r.x, r.y, r.width, r.height),
        ShapeKind::Text(t) => (t.x, t.y, t.width, t.height),
        ShapeKind::Circle(c) => (
            c.x - c.radius_x,
            c.y - c.radius_y,
            c.radius_x * 2.0,
            c.radius_y * 2.0,
        ),
        ShapeKind::Line(l) => {
            let b = Aabb::from_corners(Point::new(l.x, l.y), Point::new(l.x2, l.y2));
            (b.min_x, b.min_y, b.width(), b.height())
        }
    }
}

/// Rotation pivot of a shape.
pub fn center(shape: &Shape) -> Point {
    match &shape.kind {
        ShapeKind::Circle(c) => Point::new(c.x, c.y),
        ShapeKind::Line(l) => Point::new((l.x + l.x2) * 0.5, (l.y + l.y2) * 0.5),
        _ => {
            let (x, y, w, h) = local_box(shape);
            Point::new(x + w * 0.5, y + h * 0.5)
        }
    }
}

/// World-space bounding box including rotation.
///
/// The four corners of the local box are rotated about the center and the
/// enclosing box of those corners is returned. Line endpoints are absolute,
/// so lines use their endpoint box directly.
pub fn rotated_aabb(shape: &Shape) -> Aabb {
    let (x, y, w, h) = local_box(shape);
    if matches!(shape.kind, ShapeKind::Line(_)) || shape.rotation == 0.0 {
        return Aabb::from_rect(x, y, w, h);
    }
    let pivot = center(shape);
    let corners = [
        Point::new(x, y),
        Point::new(x + w, y),
        Point::new(x, y + h),
        Point::new(x + w, y + h),
    ]
    .map(|p| p.rotate_about(pivot, shape.rotation));
    // Four corners, never empty.
    Aabb::enclosing(&corners).unwrap_or_else(|| Aabb::from_rect(x, y, w, h))
}

// ───────────────────────────────────────────────────────────────────
// Zones
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Corner {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    North,
    South,
    East,
    West,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineEnd {
    Start,
    End,
}

/// Classification of a pointer position relative to one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    Center,
    Corner(Corner),
    Edge(Edge),
    Rotate,
    Endpoint(LineEnd),
    Outside,
}

impl Zone {
    /// CSS cursor the rendering layer should show for this zone.
    pub fn cursor_hint(&self) -> &'static str {
        match self {
            Zone::Center => "move",
            Zone::Corner(Corner::NorthWest | Corner::SouthEast) => "nwse-resize",
            Zone::Corner(Corner::NorthEast | Corner::SouthWest) => "nesw-resize",
            Zone::Edge(Edge::North | Edge::South) => "ns-resize",
            Zone::Edge(Edge::East | Edge::West) => "ew-resize",
            Zone::Rotate => "grab",
            Zone::Endpoint(_) => "crosshair",
            Zone::Outside => "default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneHit {
    pub zone: Zone,
    pub cursor: &'static str,
}

impl From<Zone> for ZoneHit {
    fn from(zone: Zone) -> Self {
        Self {
            zone,
            cursor: zone.cursor_hint(),
        }
    }
}

fn sanitize_scale(view_scale: f64) -> f64 {
    if view_scale.is_finite() && view_scale > 0.0 {
        view_scale
    } else {
        1.0
    }
}

/// Classify `(px, py)` against `shape` at the given view scale.
///
/// Priority: corners, edges, interior, rotation band. Rotated shapes are
/// tested in their local (unrotated) frame.
pub fn detect_zone(shape: &Shape, px: f64, py: f64, view_scale: f64) -> ZoneHit {
    let scale = sanitize_scale(view_scale);
    let corner_t = CORNER_HIT_PX / scale;
    let edge_t = EDGE_HIT_PX / scale;
    let band = ROTATE_BAND_PX / scale;
    let pointer = Point::new(px, py);

    if let ShapeKind::Line(l) = &shape.kind {
        let start = Point::new(l.x, l.y);
        let end = Point::new(l.x2, l.y2);
        let zone = if pointer.distance(&start) <= corner_t {
            Zone::Endpoint(LineEnd::Start)
        } else if pointer.distance(&end) <= corner_t {
            Zone::Endpoint(LineEnd::End)
        } else if distance_to_segment(pointer, start, end) <= edge_t.max(l.stroke_width * 0.5) {
            Zone::Center
        } else {
            Zone::Outside
        };
        return zone.into();
    }

    let (left, top, w, h) = local_box(shape);
    let (right, bottom) = (left + w, top + h);
    let p = pointer.rotate_about(center(shape), -shape.rotation);

    let corners = [
        (Corner::NorthWest, Point::new(left, top)),
        (Corner::NorthEast, Point::new(right, top)),
        (Corner::SouthWest, Point::new(left, bottom)),
        (Corner::SouthEast, Point::new(right, bottom)),
    ];
    for (corner, at) in corners {
        if (p.x - at.x).abs() <= corner_t && (p.y - at.y).abs() <= corner_t {
            return Zone::Corner(corner).into();
        }
    }

    let within_y = p.y >= top && p.y <= bottom;
    let within_x = p.x >= left && p.x <= right;
    if within_y && (p.x - left).abs() <= edge_t {
        return Zone::Edge(Edge::West).into();
    }
    if within_y && (p.x - right).abs() <= edge_t {
        return Zone::Edge(Edge::East).into();
    }
    if within_x && (p.y - top).abs() <= edge_t {
        return Zone::Edge(Edge::North).into();
    }
    if within_x && (p.y - bottom).abs() <= edge_t {
        return Zone::Edge(Edge::South).into();
    }
    if within_x && within_y {
        return Zone::Center.into();
    }

    let near_corner = corners
        .iter()
        .map(|(_, at)| p.distance(at))
        .fold(f64::INFINITY, f64::min);
    if near_corner <= corner_t + band {
        return Zone::Rotate.into();
    }
    Zone::Outside.into()
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return p.distance(&a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(&Point::new(a.x + t * dx, a.y + t * dy))
}

// ───────────────────────────────────────────────────────────────────
// Resize / rotate
// ───────────────────────────────────────────────────────────────────

/// One axis of an anchored resize: the extent is the distance from the
/// dragged coordinate to the anchor, and the origin is whichever side the
/// pointer is on.
fn anchored_span(anchor: f64, dragged: f64) -> (f64, f64) {
    let extent = (dragged - anchor).abs().max(MIN_SHAPE_SIZE);
    let origin = if dragged < anchor { anchor - extent } else { anchor };
    (origin, extent)
}

/// Compute the patch for dragging `zone` of `original` to `(px, py)`.
///
/// `(start_px, start_py)` is where the drag began; the offset between it and
/// the grabbed handle is preserved so the handle does not jump to the
/// pointer. Center/rotate/outside zones yield an empty patch.
pub fn resize(
    shape: &Shape,
    zone: Zone,
    px: f64,
    py: f64,
    start_px: f64,
    start_py: f64,
    original: &Shape,
) -> ShapePatch {
    if let ShapeKind::Line(l) = &original.kind {
        let (dx, dy) = (px - start_px, py - start_py);
        return match zone {
            Zone::Endpoint(LineEnd::Start) => ShapePatch::position(l.x + dx, l.y + dy),
            Zone::Endpoint(LineEnd::End) => ShapePatch {
                x2: Some(l.x2 + dx),
                y2: Some(l.y2 + dy),
                ..ShapePatch::default()
            },
            _ => ShapePatch::default(),
        };
    }

    let (left, top, w, h) = local_box(original);
    let (right, bottom) = (left + w, top + h);
    let pivot = center(original);
    let rotation = original.rotation;

    let pointer = Point::new(px, py).rotate_about(pivot, -rotation);
    let start = Point::new(start_px, start_py).rotate_about(pivot, -rotation);
    let (dx, dy) = (pointer.x - start.x, pointer.y - start.y);

    let ((nl, nw), (nt, nh)) = match zone {
        Zone::Corner(corner) => {
            let (handle_x, anchor_x) = match corner {
                Corner::NorthWest | Corner::SouthWest => (left, right),
                Corner::NorthEast | Corner::SouthEast => (right, left),
            };
            let (handle_y, anchor_y) = match corner {
                Corner::NorthWest | Corner::NorthEast => (top, bottom),
                Corner::SouthWest | Corner::SouthEast => (bottom, top),
            };
            (
                anchored_span(anchor_x, handle_x + dx),
                anchored_span(anchor_y, handle_y + dy),
            )
        }
        Zone::Edge(Edge::West) => (anchored_span(right, left + dx), (top, h)),
        Zone::Edge(Edge::East) => (anchored_span(left, right + dx), (top, h)),
        Zone::Edge(Edge::North) => ((left, w), anchored_span(bottom, top + dy)),
        Zone::Edge(Edge::South) => ((left, w), anchored_span(top, bottom + dy)),
        _ => return ShapePatch::default(),
    };

    // Keep the anchor fixed in world space for rotated shapes: move the new
    // local center through the old pivot's rotation.
    let local_center = Point::new(nl + nw * 0.5, nt + nh * 0.5);
    let world_center = local_center.rotate_about(pivot, rotation);
    let (nl, nt) = (world_center.x - nw * 0.5, world_center.y - nh * 0.5);

    match &shape.kind {
        ShapeKind::Circle(_) => ShapePatch {
            radius_x: Some(nw * 0.5),
            radius_y: Some(nh * 0.5),
            ..ShapePatch::position(world_center.x, world_center.y)
        },
        _ => ShapePatch {
            width: Some(nw),
            height: Some(nh),
            ..ShapePatch::position(nl, nt)
        },
    }
}

/// Rotation for dragging the rotate handle from `start` to `pointer`.
///
/// `initial + (angle(center→pointer) − angle(center→start))`, with the shape
/// center as pivot, normalized to `[0, 360)`.
pub fn rotate(
    shape: &Shape,
    px: f64,
    py: f64,
    start_px: f64,
    start_py: f64,
    initial_rotation: f64,
) -> f64 {
    let c = center(shape);
    let current = (py - c.y).atan2(px - c.x);
    let begin = (start_py - c.y).atan2(start_px - c.x);
    (initial_rotation + (current - begin).to_degrees()).rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShapeType;

    fn rect_at(x: f64, y: f64, w: f64, h: f64) -> Shape {
        let mut shape = Shape::with_defaults(ShapeType::Rectangle, "r", "u", 0);
        shape.apply_patch(&ShapePatch {
            x: Some(x),
            y: Some(y),
            width: Some(w),
            height: Some(h),
            ..ShapePatch::default()
        });
        shape
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_zone_classification() {
        let shape = rect_at(0.0, 0.0, 100.0, 100.0);
        assert_eq!(detect_zone(&shape, 50.0, 50.0, 1.0).zone, Zone::Center);
        assert_eq!(
            detect_zone(&shape, 2.0, 3.0, 1.0).zone,
            Zone::Corner(Corner::NorthWest)
        );
        assert_eq!(
            detect_zone(&shape, 100.0, 50.0, 1.0).zone,
            Zone::Edge(Edge::East)
        );
        assert_eq!(
            detect_zone(&shape, 50.0, 104.0, 1.0).zone,
            Zone::Edge(Edge::South)
        );
        assert_eq!(detect_zone(&shape, 120.0, 120.0, 1.0).zone, Zone::Rotate);
        assert_eq!(detect_zone(&shape, 300.0, 300.0, 1.0).zone, Zone::Outside);
    }

    #[test]
    fn test_zone_scale_invariance() {
        let shape = rect_at(0.0, 0.0, 400.0, 400.0);
        // Screen-space offsets from the south-east corner.
        let probes = [
            ((6.0, 6.0), Zone::Corner(Corner::SouthEast)),
            ((-5.0, -60.0), Zone::Edge(Edge::East)),
            ((20.0, 20.0), Zone::Rotate),
            ((-60.0, -60.0), Zone::Center),
            ((60.0, 60.0), Zone::Outside),
        ];
        for ((sx, sy), expected) in probes {
            for scale in [1.0, 2.0, 0.5] {
                let got = detect_zone(&shape, 400.0 + sx / scale, 400.0 + sy / scale, scale).zone;
                assert_eq!(got, expected, "offset ({sx},{sy}) at scale {scale}");
            }
        }
    }

    #[test]
    fn test_zone_thresholds_shrink_when_zoomed_in() {
        let shape = rect_at(0.0, 0.0, 100.0, 100.0);
        // 8 world units off the corner: a handle at 1x, interior at 4x.
        assert_eq!(
            detect_zone(&shape, 8.0, 8.0, 1.0).zone,
            Zone::Corner(Corner::NorthWest)
        );
        assert_eq!(detect_zone(&shape, 8.0, 8.0, 4.0).zone, Zone::Center);
    }

    #[test]
    fn test_zone_on_rotated_shape_uses_local_frame() {
        let mut shape = rect_at(0.0, 0.0, 100.0, 100.0);
        shape.rotation = 90.0;
        // The local north-west corner (0,0) lands at (100,0) after a 90°
        // clockwise turn about (50,50).
        assert_eq!(
            detect_zone(&shape, 100.0, 0.0, 1.0).zone,
            Zone::Corner(Corner::NorthWest)
        );
    }

    #[test]
    fn test_line_endpoint_zones() {
        let line = Shape::with_defaults(ShapeType::Line, "l", "u", 0);
        assert_eq!(
            detect_zone(&line, 1.0, 1.0, 1.0).zone,
            Zone::Endpoint(LineEnd::Start)
        );
        assert_eq!(
            detect_zone(&line, 99.0, 0.0, 1.0).zone,
            Zone::Endpoint(LineEnd::End)
        );
        assert_eq!(detect_zone(&line, 50.0, 3.0, 1.0).zone, Zone::Center);
        assert_eq!(detect_zone(&line, 50.0, 40.0, 1.0).zone, Zone::Outside);
    }

    #[test]
    fn test_cursor_hints() {
        let shape = rect_at(0.0, 0.0, 100.0, 100.0);
        assert_eq!(detect_zone(&shape, 0.0, 100.0, 1.0).cursor, "nesw-resize");
        assert_eq!(detect_zone(&shape, 50.0, 50.0, 1.0).cursor, "move");
    }

    #[test]
    fn test_resize_past_anchor_flips_from_every_corner() {
        let original = rect_at(100.0, 100.0, 100.0, 100.0);
        let cases = [
            // (corner, grabbed handle, anchor, pointer beyond the anchor)
            (Corner::SouthEast, (200.0, 200.0), (100.0, 100.0), (40.0, 70.0)),
            (Corner::NorthWest, (100.0, 100.0), (200.0, 200.0), (260.0, 230.0)),
            (Corner::NorthEast, (200.0, 100.0), (100.0, 200.0), (40.0, 230.0)),
            (Corner::SouthWest, (100.0, 200.0), (200.0, 100.0), (260.0, 70.0)),
        ];
        for (corner, (hx, hy), (ax, ay), (px, py)) in cases {
            let patch = resize(&original, Zone::Corner(corner), px, py, hx, hy, &original);
            let (x, y) = (patch.x.unwrap(), patch.y.unwrap());
            let (w, h) = (patch.width.unwrap(), patch.height.unwrap());

            assert!(w >= MIN_SHAPE_SIZE && h >= MIN_SHAPE_SIZE, "{corner:?}");
            assert!(approx(w, (px - ax).abs()) && approx(h, (py - ay).abs()), "{corner:?}");
            // The box spans pointer..anchor, so the origin is the pointer
            // coordinate whenever the pointer lies before the anchor.
            assert!(approx(x, px.min(ax)) && approx(y, py.min(ay)), "{corner:?}");
            assert!(approx(x + w, px.max(ax)) && approx(y + h, py.max(ay)), "{corner:?}");
        }
    }

    #[test]
    fn test_resize_south_east_past_anchor_reports_pointer_corner() {
        let original = rect_at(100.0, 100.0, 100.0, 100.0);
        let patch = resize(
            &original,
            Zone::Corner(Corner::SouthEast),
            40.0,
            70.0,
            200.0,
            200.0,
            &original,
        );
        assert_eq!(patch.x, Some(40.0));
        assert_eq!(patch.y, Some(70.0));
        assert_eq!(patch.width, Some(60.0));
        assert_eq!(patch.height, Some(30.0));
    }

    #[test]
    fn test_resize_clamps_to_minimum() {
        let original = rect_at(0.0, 0.0, 100.0, 100.0);
        let patch = resize(
            &original,
            Zone::Corner(Corner::SouthEast),
            1.0,
            2.0,
            100.0,
            100.0,
            &original,
        );
        assert_eq!(patch.width, Some(MIN_SHAPE_SIZE));
        assert_eq!(patch.height, Some(MIN_SHAPE_SIZE));
        assert_eq!(patch.x, Some(0.0));
    }

    #[test]
    fn test_resize_keeps_grab_offset() {
        let original = rect_at(0.0, 0.0, 100.0, 100.0);
        // Grabbed 3px inside the corner, dragged 10px outward.
        let patch = resize(
            &original,
            Zone::Corner(Corner::SouthEast),
            107.0,
            107.0,
            97.0,
            97.0,
            &original,
        );
        assert_eq!(patch.width, Some(110.0));
        assert_eq!(patch.height, Some(110.0));
    }

    #[test]
    fn test_resize_edge_changes_one_axis() {
        let original = rect_at(10.0, 20.0, 100.0, 50.0);
        let patch = resize(
            &original,
            Zone::Edge(Edge::East),
            150.0,
            999.0,
            110.0,
            45.0,
            &original,
        );
        assert_eq!(patch.width, Some(140.0));
        assert_eq!(patch.height, Some(50.0));
        assert_eq!(patch.x, Some(10.0));
        assert_eq!(patch.y, Some(20.0));
    }

    #[test]
    fn test_resize_circle_reports_center_and_radii() {
        let circle = Shape::with_defaults(ShapeType::Circle, "c", "u", 0);
        // Default circle spans (0,0)-(100,100); drag SE handle to (200,100).
        let patch = resize(
            &circle,
            Zone::Corner(Corner::SouthEast),
            200.0,
            100.0,
            100.0,
            100.0,
            &circle,
        );
        assert_eq!(patch.radius_x, Some(100.0));
        assert_eq!(patch.radius_y, Some(50.0));
        assert_eq!(patch.x, Some(100.0));
        assert_eq!(patch.y, Some(50.0));
    }

    #[test]
    fn test_resize_rotated_keeps_anchor_in_world_space() {
        let mut original = rect_at(0.0, 0.0, 100.0, 100.0);
        original.rotation = 30.0;
        let pivot = center(&original);
        let anchor_world = Point::new(0.0, 0.0).rotate_about(pivot, 30.0);
        let handle_world = Point::new(100.0, 100.0).rotate_about(pivot, 30.0);

        let patch = resize(
            &original,
            Zone::Corner(Corner::SouthEast),
            handle_world.x + 20.0,
            handle_world.y + 10.0,
            handle_world.x,
            handle_world.y,
            &original,
        );
        let mut resized = original.clone();
        resized.apply_patch(&patch);
        let new_anchor = Point::new(patch.x.unwrap(), patch.y.unwrap())
            .rotate_about(center(&resized), 30.0);

        assert!(approx(new_anchor.x, anchor_world.x), "{new_anchor:?} vs {anchor_world:?}");
        assert!(approx(new_anchor.y, anchor_world.y));
    }

    #[test]
    fn test_resize_line_endpoint() {
        let line = Shape::with_defaults(ShapeType::Line, "l", "u", 0);
        let patch = resize(
            &line,
            Zone::Endpoint(LineEnd::End),
            130.0,
            40.0,
            100.0,
            0.0,
            &line,
        );
        assert_eq!(patch.x2, Some(130.0));
        assert_eq!(patch.y2, Some(40.0));
        assert_eq!(patch.x, None);
    }

    #[test]
    fn test_resize_center_zone_is_noop() {
        let original = rect_at(0.0, 0.0, 100.0, 100.0);
        assert!(resize(&original, Zone::Center, 5.0, 5.0, 0.0, 0.0, &original).is_empty());
    }

    #[test]
    fn test_rotate_uses_center_pivot() {
        let shape = rect_at(0.0, 0.0, 100.0, 100.0);
        // Start directly right of the center (50,50), end directly below it.
        let degrees = rotate(&shape, 50.0, 150.0, 150.0, 50.0, 0.0);
        assert!(approx(degrees, 90.0), "{degrees}");

        let degrees = rotate(&shape, 50.0, 150.0, 150.0, 50.0, 350.0);
        assert!(approx(degrees, 80.0), "{degrees}");
    }

    #[test]
    fn test_rotated_aabb_grows() {
        let mut shape = rect_at(0.0, 0.0, 100.0, 100.0);
        shape.rotation = 45.0;
        let aabb = rotated_aabb(&shape);
        let half_diag = 50.0 * 2f64.sqrt();
        assert!(approx(aabb.min_x, 50.0 - half_diag));
        assert!(approx(aabb.max_y, 50.0 + half_diag));
    }
}
