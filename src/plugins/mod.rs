pub mod hard;

pub use hard::{HardStepPlugin, HardStepSet, HardStepStats};
