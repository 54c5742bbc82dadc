use std::path::PathBuf;

/// Errors that can occur in channel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to create the pre-fork socket pair.
    #[error("failed to create socket pair: {0}")]
    Pair(#[source] std::io::Error),

    /// Failed to create a named FIFO.
    #[error("failed to create fifo at {path}: {source}")]
    CreateFifo {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// Failed to open a named FIFO end.
    #[error("failed to open fifo {path}: {source}")]
    OpenFifo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred on a bound endpoint.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fifo channel cannot yield both endpoints inside one image: each
    /// blocking FIFO open needs the peer image on the other end.
    #[error("cannot split a fifo channel within one process image")]
    SplitUnsupported,

    /// Failed to remove filesystem-backed channel storage.
    #[error("failed to remove channel storage {path}: {source}")]
    Clear {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ChannelError>;
