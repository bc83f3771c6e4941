//! Local mirror of a cluster collection, kept current by the gateway's watch.

pub mod handler;
pub mod reflector;
pub mod store;

pub use handler::{LoggingHandler, ResourceEventHandler};
pub use reflector::Reflector;
pub use store::{object_key, Lister};
