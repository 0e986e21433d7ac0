mod log_analyser;
mod mem_store;

pub use log_analyser::LogAnalyser;
pub use mem_store::{MemStore, Seed};
