//! Domain Services
//!
//! Pure logic with no infrastructure dependencies.

pub mod load_balancer;

pub use load_balancer::{new_load_balance, LoadBalance, Random, RoundRobin};
