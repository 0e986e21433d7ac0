mod analyser;
mod meta_store;

pub use analyser::Analyser;
pub use meta_store::{Event, EventSource, EventType, MetaStore, MetaValue, Visitor};
