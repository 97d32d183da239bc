//! Destination implementations

mod log;

pub use self::log::LogDestination;
