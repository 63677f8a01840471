pub mod accessor;
pub mod classify;
pub mod config;
pub mod sync;
pub mod tags;

pub use accessor::{Accessor, Assignment, LookupParameterMap};
pub use classify::{ParamDriver, classify, parse_number, parse_offset};
pub use config::{DriverKeywords, PositionMode, SyncConfig, TagStyle};
pub use sync::{GraphicsUpdateStatus, PendingUpdate, SyncEngine, Transform};
pub use tags::{Tag, TagKind, TagManager};
