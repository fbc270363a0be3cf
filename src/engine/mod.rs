pub mod controller;
pub mod inference;
pub mod previous_day;
pub mod runner;

pub use controller::*;
pub use inference::SignalEngine;
pub use previous_day::PreviousDayCache;
pub use runner::{EngineRunner, Schedule};
