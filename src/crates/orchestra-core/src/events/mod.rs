//! Typed execution events and observer fan-out

pub mod dispatcher;
pub mod stdout;
pub mod types;

pub use dispatcher::{EventDispatcher, EventObserver};
pub use stdout::StdoutObserver;
pub use types::Event;
