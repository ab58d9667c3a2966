//! Domain types shared by the expander, journal and aggregate store.

pub mod location;
pub mod status;
pub mod target;
pub mod task;

pub use location::{LocationKey, Viewer};
pub use status::{BugTaskImportance, BugTaskStatus, ParseEnumError};
pub use target::{Specialization, Target, TargetColumns, TargetError};
pub use task::{BugTaskFlat, LocationProjection};
