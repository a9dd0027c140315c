//! # tessera-core: shape model and local editing engine
//!
//! Everything a client does to its own copy of the canvas, with no I/O:
//!
//! ```text
//!   Command ──plan──► Mutation ─┐
//!                               ▼
//!   geometry::resize ──► ShapePatch ──► ObjectStore ──snapshot──► HistoryManager
//!                                          ▲
//!   selection::shapes_in_box ──batch_lock──┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: `Shape`, `ShapeKind`, `ShapePatch` and the JSON record shape
//! - [`store`]: `ObjectStore` with the per-shape lock guard
//! - [`history`]: bounded snapshot undo/redo
//! - [`geometry`]: zone detection, anchored resize, rotation
//! - [`selection`]: marquee hit testing with lock conflicts
//! - [`command`]: structured command resolution
//!
//! Synchronisation with other clients lives in `tessera-collab`.

pub mod command;
pub mod geometry;
pub mod history;
pub mod model;
pub mod selection;
pub mod store;

pub use command::{
    apply_mutation, plan_commands, Axis, Command, CommandContext, CommandError, Mutation,
    Selector, ShapeError, ShapeSpec, UpdateMode,
};
pub use geometry::{detect_zone, resize, rotate, rotated_aabb, Aabb, Point, Zone, ZoneHit};
pub use history::{HistoryManager, Snapshot, DEFAULT_HISTORY_LIMIT};
pub use model::{
    Shape, ShapeId, ShapeKind, ShapeMap, ShapePatch, ShapeType, UserId, MIN_SHAPE_SIZE,
};
pub use selection::{shapes_in_box, SelectionConflict};
pub use store::{ObjectStore, UpdateOutcome};
