//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the delivery pipeline:
//! the payload value model, `Dispatch`, scopes, rule and mapping data, live
//! settings and the collaborator traits (destinations, barriers, transformers,
//! consent and the durable queue repository).
//!
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Dispatch timestamps are Unix epoch milliseconds (`i64`)
//! - Expiry is measured against the same clock

mod barrier;
mod consent;
mod destination;
mod dispatch;
mod error;
mod mapping;
mod path;
mod repository;
mod rules;
mod scope;
mod settings;
mod track;
mod transform;
mod value;

pub use barrier::*;
pub use consent::*;
pub use destination::*;
pub use dispatch::*;
pub use error::*;
pub use mapping::*;
pub use path::{PathComponent, PathReference};
pub use repository::{EvictedDispatch, QueueRepository};
pub use rules::*;
pub use scope::*;
pub use settings::*;
pub use track::*;
pub use transform::*;
pub use value::{DataItem, DataObject};
