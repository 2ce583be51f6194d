//! Error taxonomy of the hard integration layer.
//!
//! Nothing in this crate recovers from these locally: every variant marks a state the
//! calling simulator must not continue from, and is propagated to the entry point.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum HardError {
    /// Cluster, group or particle counts exceed the configured array ceiling
    Capacity {
        what: &'static str,
        requested: usize,
        limit: usize,
    },
    /// Mass, id or address bookkeeping is inconsistent
    Invariant(String),
    /// Per-cluster energy drift above the configured threshold; the cluster was dumped
    EnergyDrift {
        cluster: usize,
        drift: f64,
        threshold: f64,
        dump: Option<PathBuf>,
    },
    /// Checkpoint data is short or malformed
    Checkpoint(String),
    /// A parameter failed validation
    InvalidParameter(String),
    /// An integration engine exceeded its step-count safety limit
    StepLimit {
        engine: &'static str,
        steps: usize,
        time: f64,
        target: f64,
    },
    /// Symplectic scheme name not found in the registry
    UnknownScheme(String),
    Io(std::io::Error),
    Serialize(String),
}

impl fmt::Display for HardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardError::Capacity {
                what,
                requested,
                limit,
            } => write!(
                f,
                "Array capacity exceeded for {what}: requested {requested}, limit {limit}"
            ),
            HardError::Invariant(msg) => write!(f, "Invariant violated: {msg}"),
            HardError::EnergyDrift {
                cluster,
                drift,
                threshold,
                dump,
            } => {
                write!(
                    f,
                    "Hard energy drift {drift:e} in cluster {cluster} exceeds threshold {threshold:e}"
                )?;
                if let Some(path) = dump {
                    write!(f, " (state dumped to {})", path.display())?;
                }
                Ok(())
            }
            HardError::Checkpoint(msg) => write!(f, "Invalid checkpoint: {msg}"),
            HardError::InvalidParameter(msg) => write!(f, "Invalid parameter: {msg}"),
            HardError::StepLimit {
                engine,
                steps,
                time,
                target,
            } => write!(
                f,
                "{engine} integrator exceeded {steps} steps at time {time} (target {target})"
            ),
            HardError::UnknownScheme(msg) => write!(f, "Unknown symplectic scheme: {msg}"),
            HardError::Io(e) => write!(f, "I/O error: {e}"),
            HardError::Serialize(msg) => write!(f, "Serialization failed: {msg}"),
        }
    }
}

impl std::error::Error for HardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HardError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HardError {
    fn from(e: std::io::Error) -> Self {
        HardError::Io(e)
    }
}

impl From<toml::ser::Error> for HardError {
    fn from(e: toml::ser::Error) -> Self {
        HardError::Serialize(e.to_string())
    }
}

pub type HardResult<T> = Result<T, HardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_dump_path() {
        let error = HardError::EnergyDrift {
            cluster: 4,
            drift: 1e-3,
            threshold: 1e-6,
            dump: Some(PathBuf::from("/tmp/hard_dump.toml")),
        };
        let message = error.to_string();
        assert!(message.contains("cluster 4"));
        assert!(message.contains("/tmp/hard_dump.toml"));
    }

    #[test]
    fn test_io_error_is_source() {
        use std::error::Error;
        let error: HardError = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short").into();
        assert!(error.source().is_some());
    }
}
