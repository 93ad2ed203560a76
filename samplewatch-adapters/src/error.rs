//! Error types for adapters.

use samplewatch_sdk::SampleError;
use thiserror::Error;

/// Errors that can occur while a built-in monitor gathers a sample.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Reading a file or socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP endpoint answered with a non-success status.
    #[error("HTTP request for {path} failed with status {status}")]
    Http { path: String, status: u16 },

    /// Failed to parse a response or file.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The container the agent runs in could not be found.
    #[error("Unable to find a matching container id for container '{0}'. Make sure a container with that name is running.")]
    ContainerNotFound(String),
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Parse(err.to_string())
    }
}

impl From<AdapterError> for SampleError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Io(e) => SampleError::Io(e),
            other => SampleError::Other(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_sample_error() {
        let io = AdapterError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(matches!(SampleError::from(io), SampleError::Io(_)));

        let http = AdapterError::Http {
            path: "/containers/json".to_string(),
            status: 500,
        };
        let sample = SampleError::from(http);
        assert_eq!(
            sample.to_string(),
            "HTTP request for /containers/json failed with status 500"
        );
    }

    #[test]
    fn json_errors_become_parse_errors() {
        let err = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        assert!(matches!(AdapterError::from(err), AdapterError::Parse(_)));
    }
}
