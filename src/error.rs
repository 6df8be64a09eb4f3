use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every public operation of the crate fails with one of these.
#[derive(Debug, Error)]
pub enum VmImageError {
    /// Malformed image name, unsupported URL and similar caller mistakes.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sidecar digest fetch or host reachability failure.
    #[error("network error: {0}")]
    Network(String),

    /// Failure reported by the container runtime or the image hub.
    #[error("{op} {name} failed: {source}")]
    Backend {
        op: &'static str,
        name: String,
        #[source]
        source: BoxError,
    },

    /// Unknown backend type, missing credentials.
    #[error("configuration error: {0}")]
    Config(String),
}

impl VmImageError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wraps a backend failure with the failing operation and the image it was about.
    pub fn backend(op: &'static str, name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            op,
            name: name.into(),
            source: source.into(),
        }
    }
}

pub type Result<T, E = VmImageError> = std::result::Result<T, E>;

/// Attaches backend context to results coming out of the runtime and hub clients.
pub trait BackendContext<T> {
    fn backend_ctx(self, op: &'static str, name: &str) -> Result<T>;
}

impl<T> BackendContext<T> for anyhow::Result<T> {
    fn backend_ctx(self, op: &'static str, name: &str) -> Result<T> {
        self.map_err(|err| VmImageError::backend(op, name, err))
    }
}
