//! Shape records shared by the store, the history and both network channels.
//!
//! A [`Shape`] carries the fields every variant has (identity, z-order,
//! ownership, lock) and a [`ShapeKind`] with the variant geometry. On the
//! wire the kind is flattened into the record and tagged by `"type"`:
//!
//! ```text
//! { "id": "…", "type": "rectangle", "x": 10, "y": 20, "width": 100,
//!   "height": 50, "rotation": 0, "opacity": 1, "zIndex": 3,
//!   "createdBy": "alice", "lockedBy": null }
//! ```
//!
//! Optional style fields are omitted when absent. `lockedBy` is always
//! written, as `null` when nobody holds the shape.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Opaque shape identifier.
pub type ShapeId = String;

/// Opaque user identifier.
pub type UserId = String;

/// The full shape collection, ordered by id so snapshots diff cheaply.
pub type ShapeMap = BTreeMap<ShapeId, Shape>;

/// Smallest width/height (world units) a resize may produce.
pub const MIN_SHAPE_SIZE: f64 = 5.0;

fn default_opacity() -> f64 {
    1.0
}

/// A single drawable object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: ShapeId,
    /// Degrees, clockwise, about the shape center.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Higher draws on top.
    #[serde(default)]
    pub z_index: i64,
    pub created_by: UserId,
    #[serde(default)]
    pub locked_by: Option<UserId>,
    #[serde(flatten)]
    pub kind: ShapeKind,
}

/// Variant geometry, tagged by `"type"` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeKind {
    Rectangle(Rectangle),
    Circle(Circle),
    Line(Line),
    Text(TextBox),
}

/// Variant discriminant without geometry, used by selectors and specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Rectangle,
    Circle,
    Line,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
}

/// Ellipse centered on `(x, y)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub radius_x: f64,
    pub radius_y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
}

/// Segment from `(x, y)` to `(x2, y2)` in world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub x: f64,
    pub y: f64,
    pub x2: f64,
    pub y2: f64,
    pub stroke_width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub font_size: f64,
    pub font_family: String,
    pub text_color: String,
    #[serde(default)]
    pub align: TextAlign,
    #[serde(default)]
    pub vertical_align: VerticalAlign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAlign {
    #[default]
    Top,
    Middle,
    Bottom,
}

/// Deserialize a present field (even `null`) as `Some(..)` so a patch can
/// tell "clear the lock" apart from "leave the lock alone".
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// Partial update merged into a [`Shape`].
///
/// Fields that do not exist on the target variant are ignored. Serialized
/// with absent fields omitted, which is the merge document the durable
/// channel receives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<TextAlign>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_align: Option<VerticalAlign>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub locked_by: Option<Option<UserId>>,
}

impl ShapePatch {
    /// Patch that moves a shape to `(x, y)`.
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    /// Patch that sets the lock holder.
    pub fn lock(user_id: impl Into<UserId>) -> Self {
        Self {
            locked_by: Some(Some(user_id.into())),
            ..Self::default()
        }
    }

    /// Patch that clears the lock holder (written as an explicit `null`).
    pub fn unlock() -> Self {
        Self {
            locked_by: Some(None),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay `newer` on top of `self`; fields set in `newer` win.
    pub fn merge(&mut self, newer: &ShapePatch) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $( if newer.$field.is_some() { self.$field = newer.$field.clone(); } )*
            };
        }
        overlay!(
            x, y, width, height, radius_x, radius_y, x2, y2, rotation, opacity, z_index, color,
            stroke, stroke_width, text, font_size, font_family, text_color, align,
            vertical_align, locked_by
        );
    }

    /// Interpret numeric fields as deltas against `shape` and return the
    /// equivalent absolute patch. Non-numeric fields are copied through.
    /// On a line, an `x`/`y` delta without its `x2`/`y2` counterpart moves
    /// both endpoints.
    pub fn relative_to(&self, shape: &Shape) -> ShapePatch {
        let current = shape.as_patch();
        let add = |delta: Option<f64>, base: Option<f64>| delta.map(|d| base.unwrap_or(0.0) + d);
        let (dx2, dy2) = match shape.kind {
            ShapeKind::Line(_) => (self.x2.or(self.x), self.y2.or(self.y)),
            _ => (self.x2, self.y2),
        };
        ShapePatch {
            x: add(self.x, current.x),
            y: add(self.y, current.y),
            width: add(self.width, current.width),
            height: add(self.height, current.height),
            radius_x: add(self.radius_x, current.radius_x),
            radius_y: add(self.radius_y, current.radius_y),
            x2: add(dx2, current.x2),
            y2: add(dy2, current.y2),
            rotation: add(self.rotation, current.rotation),
            opacity: add(self.opacity, current.opacity),
            font_size: add(self.font_size, current.font_size),
            stroke_width: add(self.stroke_width, current.stroke_width),
            z_index: self.z_index.map(|d| current.z_index.unwrap_or(0) + d),
            ..self.clone()
        }
    }
}

impl Shape {
    /// A shape of the given type with default geometry at the origin.
    pub fn with_defaults(
        shape_type: ShapeType,
        id: impl Into<ShapeId>,
        created_by: impl Into<UserId>,
        z_index: i64,
    ) -> Self {
        let kind = match shape_type {
            ShapeType::Rectangle => ShapeKind::Rectangle(Rectangle {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
                color: Some("#3B82F6".to_string()),
                stroke: None,
                stroke_width: None,
            }),
            ShapeType::Circle => ShapeKind::Circle(Circle {
                x: 50.0,
                y: 50.0,
                radius_x: 50.0,
                radius_y: 50.0,
                color: Some("#10B981".to_string()),
                stroke: None,
                stroke_width: None,
            }),
            ShapeType::Line => ShapeKind::Line(Line {
                x: 0.0,
                y: 0.0,
                x2: 100.0,
                y2: 0.0,
                stroke_width: 2.0,
                stroke: Some("#111827".to_string()),
            }),
            ShapeType::Text => ShapeKind::Text(TextBox {
                x: 0.0,
                y: 0.0,
                width: 200.0,
                height: 40.0,
                text: String::new(),
                font_size: 16.0,
                font_family: "Arial".to_string(),
                text_color: "#000000".to_string(),
                align: TextAlign::Left,
                vertical_align: VerticalAlign::Top,
            }),
        };
        Self {
            id: id.into(),
            rotation: 0.0,
            opacity: 1.0,
            z_index,
            created_by: created_by.into(),
            locked_by: None,
            kind,
        }
    }

    pub fn shape_type(&self) -> ShapeType {
        match self.kind {
            ShapeKind::Rectangle(_) => ShapeType::Rectangle,
            ShapeKind::Circle(_) => ShapeType::Circle,
            ShapeKind::Line(_) => ShapeType::Line,
            ShapeKind::Text(_) => ShapeType::Text,
        }
    }

    /// Fill color for filled variants, stroke color for lines, text color
    /// for text.
    pub fn color(&self) -> Option<&str> {
        match &self.kind {
            ShapeKind::Rectangle(r) => r.color.as_deref(),
            ShapeKind::Circle(c) => c.color.as_deref(),
            ShapeKind::Line(l) => l.stroke.as_deref(),
            ShapeKind::Text(t) => Some(t.text_color.as_str()),
        }
    }

    pub fn is_locked_by_other(&self, user_id: &str) -> bool {
        self.locked_by.as_deref().is_some_and(|holder| holder != user_id)
    }

    /// Merge `patch` into this shape and re-normalize.
    pub fn apply_patch(&mut self, patch: &ShapePatch) {
        if let Some(rotation) = patch.rotation {
            self.rotation = rotation;
        }
        if let Some(opacity) = patch.opacity {
            self.opacity = opacity;
        }
        if let Some(z_index) = patch.z_index {
            self.z_index = z_index;
        }
        if let Some(locked_by) = &patch.locked_by {
            self.locked_by = locked_by.clone();
        }

        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        match &mut self.kind {
            ShapeKind::Rectangle(r) => {
                set(&mut r.x, &patch.x);
                set(&mut r.y, &patch.y);
                set(&mut r.width, &patch.width);
                set(&mut r.height, &patch.height);
                set_opt(&mut r.color, &patch.color);
                set_opt(&mut r.stroke, &patch.stroke);
                set_opt(&mut r.stroke_width, &patch.stroke_width);
            }
            ShapeKind::Circle(c) => {
                set(&mut c.x, &patch.x);
                set(&mut c.y, &patch.y);
                set(&mut c.radius_x, &patch.radius_x);
                set(&mut c.radius_y, &patch.radius_y);
                set_opt(&mut c.color, &patch.color);
                set_opt(&mut c.stroke, &patch.stroke);
                set_opt(&mut c.stroke_width, &patch.stroke_width);
            }
            ShapeKind::Line(l) => {
                set(&mut l.x, &patch.x);
                set(&mut l.y, &patch.y);
                set(&mut l.x2, &patch.x2);
                set(&mut l.y2, &patch.y2);
                set(&mut l.stroke_width, &patch.stroke_width);
                // Lines have no fill; a color request recolors the stroke.
                set_opt(&mut l.stroke, &patch.stroke);
                if patch.stroke.is_none() {
                    set_opt(&mut l.stroke, &patch.color);
                }
            }
            ShapeKind::Text(t) => {
                set(&mut t.x, &patch.x);
                set(&mut t.y, &patch.y);
                set(&mut t.width, &patch.width);
                set(&mut t.height, &patch.height);
                set(&mut t.text, &patch.text);
                set(&mut t.font_size, &patch.font_size);
                set(&mut t.font_family, &patch.font_family);
                set(&mut t.text_color, &patch.text_color);
                if patch.text_color.is_none() {
                    set(&mut t.text_color, &patch.color);
                }
                set(&mut t.align, &patch.align);
                set(&mut t.vertical_align, &patch.vertical_align);
            }
        }

        self.normalize();
    }

    /// Make extents non-negative and clamp opacity.
    ///
    /// A negative width moves the origin by the width so the covered area is
    /// unchanged; radii simply take their magnitude.
    pub fn normalize(&mut self) {
        fn flip(origin: &mut f64, extent: &mut f64) {
            if *extent < 0.0 {
                *origin += *extent;
                *extent = -*extent;
            }
        }

        self.opacity = self.opacity.clamp(0.0, 1.0);
        match &mut self.kind {
            ShapeKind::Rectangle(r) => {
                flip(&mut r.x, &mut r.width);
                flip(&mut r.y, &mut r.height);
            }
            ShapeKind::Text(t) => {
                flip(&mut t.x, &mut t.width);
                flip(&mut t.y, &mut t.height);
                t.font_size = t.font_size.abs();
            }
            ShapeKind::Circle(c) => {
                c.radius_x = c.radius_x.abs();
                c.radius_y = c.radius_y.abs();
            }
            ShapeKind::Line(l) => {
                l.stroke_width = l.stroke_width.abs();
            }
        }
    }

    /// Patch that reproduces every field of this shape except id,
    /// creator and lock.
    pub fn as_patch(&self) -> ShapePatch {
        let mut patch = ShapePatch {
            rotation: Some(self.rotation),
            opacity: Some(self.opacity),
            z_index: Some(self.z_index),
            ..ShapePatch::default()
        };
        match &self.kind {
            ShapeKind::Rectangle(r) => {
                patch.x = Some(r.x);
                patch.y = Some(r.y);
                patch.width = Some(r.width);
                patch.height = Some(r.height);
                patch.color = r.color.clone();
                patch.stroke = r.stroke.clone();
                patch.stroke_width = r.stroke_width;
            }
            ShapeKind::Circle(c) => {
                patch.x = Some(c.x);
                patch.y = Some(c.y);
                patch.radius_x = Some(c.radius_x);
                patch.radius_y = Some(c.radius_y);
                patch.color = c.color.clone();
                patch.stroke = c.stroke.clone();
                patch.stroke_width = c.stroke_width;
            }
            ShapeKind::Line(l) => {
                patch.x = Some(l.x);
                patch.y = Some(l.y);
                patch.x2 = Some(l.x2);
                patch.y2 = Some(l.y2);
                patch.stroke_width = Some(l.stroke_width);
                patch.stroke = l.stroke.clone();
            }
            ShapeKind::Text(t) => {
                patch.x = Some(t.x);
                patch.y = Some(t.y);
                patch.width = Some(t.width);
                patch.height = Some(t.height);
                patch.text = Some(t.text.clone());
                patch.font_size = Some(t.font_size);
                patch.font_family = Some(t.font_family.clone());
                patch.text_color = Some(t.text_color.clone());
                patch.align = Some(t.align);
                patch.vertical_align = Some(t.vertical_align);
            }
        }
        patch
    }

    /// Patch that moves the whole shape by `(dx, dy)`; lines move both ends.
    pub fn translated(&self, dx: f64, dy: f64) -> ShapePatch {
        match &self.kind {
            ShapeKind::Rectangle(Rectangle { x, y, .. })
            | ShapeKind::Circle(Circle { x, y, .. })
            | ShapeKind::Text(TextBox { x, y, .. }) => ShapePatch::position(x + dx, y + dy),
            ShapeKind::Line(l) => ShapePatch {
                x2: Some(l.x2 + dx),
                y2: Some(l.y2 + dy),
                ..ShapePatch::position(l.x + dx, l.y + dy)
            },
        }
    }
}
