//! Structured commands produced by the natural-language translator.
//!
//! Commands are resolved against the live store into a list of
//! [`Mutation`]s. Resolution runs on a scratch copy of the store so a later
//! command in the same batch sees the effects of earlier ones (create a
//! text box, then move it by name). The caller applies the mutations to the
//! real store and persists them as one history entry.
//!
//! ```json
//! [
//!   { "action": "create", "type": "text", "text": "Title", "x": 40, "y": 40 },
//!   { "action": "update", "target": { "by": "name", "name": "title" },
//!     "patch": { "x": 10 }, "mode": "relative" },
//!   { "action": "update", "target": { "by": "property", "kind": "circle" },
//!     "patch": {}, "mode": { "distribute": { "axis": "x", "spacing": 20 } } },
//!   { "action": "delete", "target": { "by": "selected" } }
//! ]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::local_box;
use crate::model::{Shape, ShapeId, ShapeKind, ShapePatch, ShapeType};
use crate::store::ObjectStore;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("Field '{0}' must be a finite number")]
    NonFinite(&'static str),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("No editable shapes match {0}")]
    NoTargets(Selector),

    #[error("Invalid shape: {0}")]
    Shape(#[from] ShapeError),
}

/// A new shape request; unspecified fields take the variant defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeSpec {
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    #[serde(flatten)]
    pub props: ShapePatch,
}

impl ShapeSpec {
    pub fn new(shape_type: ShapeType) -> Self {
        Self {
            shape_type,
            props: ShapePatch::default(),
        }
    }

    /// Build the shape, applying variant defaults for absent fields.
    ///
    /// Lock and z-index in `props` are ignored; a new shape starts unlocked
    /// at the given z-index.
    pub fn into_shape(
        self,
        id: impl Into<ShapeId>,
        created_by: &str,
        z_index: i64,
    ) -> Result<Shape, ShapeError> {
        self.validate()?;
        let mut shape = Shape::with_defaults(self.shape_type, id, created_by, z_index);
        let props = ShapePatch {
            locked_by: None,
            z_index: None,
            ..self.props
        };
        shape.apply_patch(&props);
        Ok(shape)
    }

    fn validate(&self) -> Result<(), ShapeError> {
        let p = &self.props;
        let numbers = [
            ("x", p.x),
            ("y", p.y),
            ("width", p.width),
            ("height", p.height),
            ("radiusX", p.radius_x),
            ("radiusY", p.radius_y),
            ("x2", p.x2),
            ("y2", p.y2),
            ("rotation", p.rotation),
            ("opacity", p.opacity),
            ("strokeWidth", p.stroke_width),
            ("fontSize", p.font_size),
        ];
        for (field, value) in numbers {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(ShapeError::NonFinite(field));
            }
        }
        Ok(())
    }
}

/// Which shapes a command acts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "lowercase")]
pub enum Selector {
    Id {
        id: ShapeId,
    },
    /// Text shapes whose text equals `name` (case-insensitive), or the shape
    /// whose id is `name`.
    Name {
        name: String,
    },
    /// Every shape matching all given predicates.
    Property {
        #[serde(default)]
        kind: Option<ShapeType>,
        #[serde(default)]
        color: Option<String>,
    },
    Selected,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Id { id } => write!(f, "id '{id}'"),
            Selector::Name { name } => write!(f, "name '{name}'"),
            Selector::Property { kind, color } => {
                write!(f, "property")?;
                if let Some(kind) = kind {
                    write!(f, " kind={kind:?}")?;
                }
                if let Some(color) = color {
                    write!(f, " color={color}")?;
                }
                Ok(())
            }
            Selector::Selected => write!(f, "the current selection"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    #[default]
    Absolute,
    /// Numeric patch fields are deltas.
    Relative,
    /// Arrange targets along `axis`. With `spacing`, each shape starts
    /// `spacing` after the previous one ends; without it, the first and last
    /// stay put and the rest are spread evenly between them.
    Distribute {
        axis: Axis,
        #[serde(default)]
        spacing: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Create(ShapeSpec),
    Update {
        target: Selector,
        #[serde(default)]
        patch: ShapePatch,
        #[serde(default)]
        mode: UpdateMode,
    },
    Delete {
        target: Selector,
    },
}

/// One resolved change, ready to apply and persist.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Shape),
    Update { id: ShapeId, patch: ShapePatch },
    Delete(ShapeId),
}

/// Who is issuing the batch and what they have selected.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub user_id: &'a str,
    pub selection: &'a [ShapeId],
}

/// Resolve `commands` in order against `store`.
///
/// Fails on the first command with no editable targets; nothing is applied
/// in that case since the store is only read.
pub fn plan_commands(
    store: &ObjectStore,
    commands: &[Command],
    ctx: CommandContext<'_>,
) -> Result<Vec<Mutation>, CommandError> {
    let mut scratch = store.clone();
    let mut mutations = Vec::new();

    for command in commands {
        let step = plan_one(&scratch, command, ctx)?;
        for mutation in &step {
            apply_mutation(&mut scratch, mutation, ctx.user_id);
        }
        mutations.extend(step);
    }
    Ok(mutations)
}

/// Apply one resolved mutation to `store` under the usual lock guard.
pub fn apply_mutation(store: &mut ObjectStore, mutation: &Mutation, user_id: &str) {
    match mutation {
        Mutation::Create(shape) => store.add(shape.clone()),
        Mutation::Update { id, patch } => {
            store.update(id, user_id, patch);
        }
        Mutation::Delete(id) => {
            if !store.is_locked_by_other(id, user_id) {
                store.remove(id);
            }
        }
    }
}

fn plan_one(
    store: &ObjectStore,
    command: &Command,
    ctx: CommandContext<'_>,
) -> Result<Vec<Mutation>, CommandError> {
    match command {
        Command::Create(spec) => {
            let shape = spec.clone().into_shape(
                Uuid::new_v4().to_string(),
                ctx.user_id,
                store.next_z_index(),
            )?;
            Ok(vec![Mutation::Create(shape)])
        }
        Command::Update {
            target,
            patch,
            mode,
        } => {
            let targets = resolve(store, target, ctx)?;
            let mutations = match mode {
                UpdateMode::Absolute => targets
                    .iter()
                    .map(|s| Mutation::Update {
                        id: s.id.clone(),
                        patch: patch.clone(),
                    })
                    .collect(),
                UpdateMode::Relative => targets
                    .iter()
                    .map(|s| Mutation::Update {
                        id: s.id.clone(),
                        patch: patch.relative_to(s),
                    })
                    .collect(),
                UpdateMode::Distribute { axis, spacing } => distribute(&targets, *axis, *spacing),
            };
            Ok(mutations)
        }
        Command::Delete { target } => Ok(resolve(store, target, ctx)?
            .iter()
            .map(|s| Mutation::Delete(s.id.clone()))
            .collect()),
    }
}

/// Shapes matched by `selector` that `ctx.user_id` may edit.
fn resolve<'s>(
    store: &'s ObjectStore,
    selector: &Selector,
    ctx: CommandContext<'_>,
) -> Result<Vec<&'s Shape>, CommandError> {
    let matched: Vec<&Shape> = match selector {
        Selector::Id { id } => store.get(id).into_iter().collect(),
        Selector::Name { name } => store
            .iter()
            .filter(|s| {
                s.id == *name
                    || matches!(&s.kind, ShapeKind::Text(t)
                        if t.text.eq_ignore_ascii_case(name))
            })
            .collect(),
        Selector::Property { kind, color } => store
            .iter()
            .filter(|s| kind.is_none_or(|k| s.shape_type() == k))
            .filter(|s| {
                color.as_deref().is_none_or(|c| {
                    s.color().is_some_and(|own| own.eq_ignore_ascii_case(c))
                })
            })
            .collect(),
        Selector::Selected => ctx.selection.iter().filter_map(|id| store.get(id)).collect(),
    };

    let editable: Vec<&Shape> = matched
        .into_iter()
        .filter(|s| {
            let held = s.is_locked_by_other(ctx.user_id);
            if held {
                log::debug!("command skips {} held by {:?}", s.id, s.locked_by);
            }
            !held
        })
        .collect();

    if editable.is_empty() {
        return Err(CommandError::NoTargets(selector.clone()));
    }
    Ok(editable)
}

fn distribute(targets: &[&Shape], axis: Axis, spacing: Option<f64>) -> Vec<Mutation> {
    // (start, extent) along the axis.
    let span = |s: &Shape| {
        let (x, y, w, h) = local_box(s);
        match axis {
            Axis::X => (x, w),
            Axis::Y => (y, h),
        }
    };
    let mut ordered: Vec<&Shape> = targets.to_vec();
    ordered.sort_by(|a, b| span(*a).0.total_cmp(&span(*b).0));

    let Some(first) = ordered.first() else {
        return Vec::new();
    };
    let mut starts = Vec::with_capacity(ordered.len());
    match spacing {
        Some(gap) => {
            let mut cursor = span(*first).0;
            for shape in &ordered {
                starts.push(cursor);
                cursor += span(*shape).1 + gap;
            }
        }
        None => {
            // First and last stay put; the free space is split into equal gaps.
            let begin = span(*first).0;
            let end = ordered.last().map_or(begin, |s| {
                let (start, extent) = span(*s);
                start + extent
            });
            let occupied: f64 = ordered.iter().map(|s| span(*s).1).sum();
            let gap = (end - begin - occupied) / (ordered.len().max(2) - 1) as f64;
            let mut cursor = begin;
            for shape in &ordered {
                starts.push(cursor);
                cursor += span(*shape).1 + gap;
            }
        }
    }

    ordered
        .iter()
        .zip(starts)
        .filter_map(|(shape, start)| {
            let delta = start - span(*shape).0;
            if delta == 0.0 {
                return None;
            }
            let patch = match axis {
                Axis::X => shape.translated(delta, 0.0),
                Axis::Y => shape.translated(0.0, delta),
            };
            Some(Mutation::Update {
                id: shape.id.clone(),
                patch,
            })
        })
        .collect()
}
