//! The hard step: cluster partition, group and artificial-particle construction,
//! per-cluster integration and the short-range force correction.

pub mod builder;
pub mod cluster;
pub mod correction;
pub mod driver;
pub mod energy;
pub mod manager;
pub mod parallel;

pub use builder::BuildReport;
pub use cluster::{ClusterTable, GroupRecord};
pub use correction::{CorrectionParams, PotentialCorrection};
pub use driver::{HardStepReport, SystemHard};
pub use manager::HardManager;
