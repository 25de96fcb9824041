use crate::worker::protocol::FailureKind;

#[derive(Debug, Clone, PartialEq)]
pub enum GBError {
    Generic(String),
    ReadFile(String, String),
    CreateFile(String, String),
    WriteFile(String, String),
    Serialize(String, String),
    Deserialize(String, String),
    Config(String),
    MalformedInput(String),
    CoordinationUnavailable(String),
    Coordination(String),
    Transport(String),
    WorkerFailure(String),
    RecoveryExhausted(u32, String),
    Checkpoint(String),
    UnknownAggregator(String),
    Aggregator(String, String),
    UnknownComputation(String),
    Computation(String),
}

impl GBError {
    /// Rebuilds the error a worker reported inside an ack.
    pub fn from_worker(worker_id: u32, kind: FailureKind, message: &str) -> Self {
        let message = format!("worker {}: {}", worker_id, message);
        match kind {
            FailureKind::MalformedInput => GBError::MalformedInput(message),
            FailureKind::Checkpoint => GBError::Checkpoint(message),
            FailureKind::Other => GBError::WorkerFailure(message),
        }
    }

    /// Errors that only mean "try again later".
    pub fn is_transient(&self) -> bool {
        matches!(self, GBError::CoordinationUnavailable(_))
    }
}

impl std::fmt::Display for GBError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            GBError::Generic(msg) => write!(f, "[GBError] {}", msg)?,
            GBError::ReadFile(file_path, e) => {
                write!(f, "[IOError] Could not open file '{}' for reading: {}", file_path, e)?;
            }
            GBError::CreateFile(file_path, e) => {
                write!(f, "[IOError] Could not create file '{}' for writing: {}", file_path, e)?;
            }
            GBError::WriteFile(file_path, e) => {
                write!(f, "[IOError] Could not write to '{}': {}", file_path, e)?;
            }
            GBError::Serialize(name, e) => {
                write!(f, "[SerdeError] Could not serialize '{}': {}", name, e)?;
            }
            GBError::Deserialize(name, e) => {
                write!(f, "[SerdeError] Could not deserialize '{}': {}", name, e)?;
            }
            GBError::Config(message) => write!(f, "[ConfigError] {}", message)?,
            GBError::MalformedInput(message) => write!(f, "[LoadGraphError] {}", message)?,
            GBError::CoordinationUnavailable(message) => {
                write!(f, "[CoordinationError] Service unavailable: {}", message)?;
            }
            GBError::Coordination(message) => write!(f, "[CoordinationError] {}", message)?,
            GBError::Transport(message) => write!(f, "[TransportError] {}", message)?,
            GBError::WorkerFailure(message) => write!(f, "[WorkerError] {}", message)?,
            GBError::RecoveryExhausted(attempts, cause) => write!(
                f,
                "[RecoveryError] Giving up after {} recovery {}: {}",
                attempts,
                if *attempts == 1 { "attempt" } else { "attempts" },
                cause
            )?,
            GBError::Checkpoint(message) => write!(f, "[CheckpointError] {}", message)?,
            GBError::UnknownAggregator(name) => {
                write!(f, "[AggregatorError] Aggregator '{}' is not registered", name)?;
            }
            GBError::Aggregator(name, message) => {
                write!(f, "[AggregatorError] Aggregator '{}': {}", name, message)?;
            }
            GBError::UnknownComputation(name) => {
                write!(f, "[ComputationError] Unknown computation type '{}'", name)?;
            }
            GBError::Computation(message) => write!(f, "[ComputationError] {}", message)?,
        }
        Ok(())
    }
}

impl std::error::Error for GBError {}

pub fn serialize_error(name: &str, e: impl std::fmt::Display) -> GBError {
    GBError::Serialize(name.to_owned(), e.to_string())
}

pub fn deserialize_error(name: &str, e: impl std::fmt::Display) -> GBError {
    GBError::Deserialize(name.to_owned(), e.to_string())
}

#[cfg(test)]
mod tests {
    use crate::error::GBError;
    use crate::worker::protocol::FailureKind;

    #[test]
    fn worker_failures_keep_their_kind() {
        let error = GBError::from_worker(2, FailureKind::MalformedInput, "edge without target");
        assert_eq!(error, GBError::MalformedInput("worker 2: edge without target".to_owned()));
        assert_eq!(
            error.to_string(),
            "[LoadGraphError] worker 2: edge without target".to_owned()
        );
    }

    #[test]
    fn only_unavailability_is_transient() {
        assert!(GBError::CoordinationUnavailable("down".to_owned()).is_transient());
        assert!(!GBError::Checkpoint("disk full".to_owned()).is_transient());
    }
}
