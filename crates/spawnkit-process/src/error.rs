/// Errors that can occur while supervising worker processes.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The fork syscall failed. Fatal: no child exists.
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    /// Creating a new session during daemonization failed. Fatal: only
    /// possible when the forked image is already a session leader.
    #[error("failed to start new session: {0}")]
    Session(#[source] nix::Error),

    /// The call is invalid in the current lifecycle state (for example
    /// IPC before `run`, or a second `run`). Distinct from transport
    /// failures: nothing went wrong on the wire.
    #[error("usage error: {0}")]
    Usage(&'static str),

    /// Waiting on a spawned child failed.
    #[error("wait failed: {0}")]
    Wait(#[source] nix::Error),

    /// Installing or removing the child-collection signal handler failed.
    #[error("signal setup failed: {0}")]
    Signal(#[source] nix::Error),

    /// A transport-level failure on the bound channel.
    #[error("transport error: {0}")]
    Transport(#[from] spawnkit_transport::ChannelError),

    /// A framing or payload codec failure.
    #[error("frame error: {0}")]
    Frame(#[from] spawnkit_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
