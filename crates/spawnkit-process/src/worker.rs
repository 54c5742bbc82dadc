use nix::sys::stat::{umask, Mode};
use nix::sys::wait::waitpid;
use nix::unistd::{chdir, fork, setsid, ForkResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use spawnkit_frame::{FrameReader, FrameWriter, Framer};
use spawnkit_transport::{Channel, ChannelKind, ChannelStorage, EndpointHalf, Role};

use crate::error::{ProcessError, Result};
use crate::title;

pub use nix::sys::wait::WaitStatus;
pub use nix::unistd::Pid;

/// The worker body. Receives the worker-side supervisor handle and the
/// extra arguments passed to [`Worker::run`].
pub type WorkerCallback = Box<dyn FnOnce(&mut Worker, &[String])>;

/// Spawn configuration for a [`Worker`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Detach the worker as a daemon via double fork.
    pub daemonize: bool,
    /// Transport backing the master/worker channel.
    pub kind: ChannelKind,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            daemonize: false,
            kind: ChannelKind::Socket,
        }
    }
}

/// Supervises one forked worker process and the channel shared with it.
///
/// Construction stores configuration only; the transport resource is
/// acquired inside [`Worker::run`] just before fork, and bound lazily in
/// each image on its first I/O call. After fork the same logical value
/// exists once per image: the master copy returns the worker's pid and
/// exchanges messages; the worker copy runs the callback and terminates
/// through one exit routine, never returning to caller code.
pub struct Worker {
    callback: Option<WorkerCallback>,
    options: WorkerOptions,
    name: Option<String>,
    role: Role,
    forked: bool,
    pid: Option<Pid>,
    channel: Option<Channel>,
    storage: Option<ChannelStorage>,
    ipc: IpcState,
    bound_once: bool,
    framer: Framer,
}

enum IpcState {
    Unbound,
    Bound(BoundIpc),
    Closed,
}

struct BoundIpc {
    reader: FrameReader<EndpointHalf>,
    writer: FrameWriter<EndpointHalf>,
}

impl Worker {
    /// Configure a worker. No resources are acquired here.
    pub fn new<F>(callback: F, options: WorkerOptions) -> Self
    where
        F: FnOnce(&mut Worker, &[String]) + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            options,
            name: None,
            role: Role::Master,
            forked: false,
            pid: None,
            channel: None,
            storage: None,
            ipc: IpcState::Unbound,
            bound_once: false,
            framer: Framer::new(),
        }
    }

    /// Store a label for the worker; once a fork has happened, also
    /// update the OS-visible title of the running image.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.forked {
            if let Err(err) = title::set_process_title(&name) {
                warn!(%err, "failed to set process title");
            }
        }
        self.name = Some(name);
    }

    /// The worker's label, if one was set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// On the master: the last spawned child or daemon pid (`None` until
    /// `run` succeeds). On the worker: its own pid, resolved and cached
    /// on first access.
    pub fn pid(&mut self) -> Option<Pid> {
        match self.role {
            Role::Master => self.pid,
            Role::Child => Some(*self.pid.get_or_insert_with(Pid::this)),
        }
    }

    /// The role of this image. `Master` until `run` forks.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Fork the worker.
    ///
    /// Non-daemon: the master image returns the child pid without
    /// blocking. Daemon mode: double fork; the returned pid is the
    /// detached daemon's, reported over the channel by the intermediate
    /// image before it exits — the call blocks until that handshake
    /// message arrives.
    ///
    /// In the worker image this call never returns: the callback runs to
    /// completion, resources are released, and the image terminates.
    ///
    /// One-shot: the callback is consumed, so a second call fails with a
    /// usage error.
    pub fn run(&mut self, args: &[String]) -> Result<Pid> {
        let callback = self
            .callback
            .take()
            .ok_or(ProcessError::Usage("worker already started"))?;

        // Acquired before fork so every resulting image inherits it.
        let channel = Channel::create(self.options.kind)?;
        self.storage = Some(channel.storage());
        self.channel = Some(channel);

        if self.options.daemonize {
            self.run_daemon(callback, args)
        } else {
            self.run_plain(callback, args)
        }
    }

    fn run_plain(&mut self, callback: WorkerCallback, args: &[String]) -> Result<Pid> {
        // SAFETY: single-fork spawn; the child image only touches state
        // owned by this Worker before exiting through exit_worker.
        match unsafe { fork() }.map_err(ProcessError::Fork)? {
            ForkResult::Parent { child } => {
                self.forked = true;
                self.pid = Some(child);
                debug!(%child, "spawned worker");
                Ok(child)
            }
            ForkResult::Child => {
                self.enter_child();
                callback(self, args);
                self.exit_worker();
            }
        }
    }

    /// Double-fork daemonization.
    ///
    /// One fork alone would leave the worker attached to the launching
    /// session, so: the first-fork child starts a new session, forks
    /// again, reports the grandchild's pid back over the channel and
    /// exits; the grandchild — reparented, no longer a session leader,
    /// unable to reacquire a controlling terminal — is the daemon. The
    /// launcher blocks on that single pid message: it never returns
    /// before the daemon's true pid is known.
    fn run_daemon(&mut self, callback: WorkerCallback, args: &[String]) -> Result<Pid> {
        // SAFETY: double-fork daemonization; each image diverges onto its
        // own path immediately and non-launcher images exit on their own.
        match unsafe { fork() }.map_err(ProcessError::Fork)? {
            ForkResult::Parent { child: intermediate } => {
                self.forked = true;
                let handshake: Result<i32> = self.read();
                // The intermediate exits right after reporting; reap it
                // here so it cannot linger as a zombie.
                let _ = waitpid(intermediate, None);
                let daemon = Pid::from_raw(handshake?);
                self.pid = Some(daemon);
                info!(%daemon, "daemon spawned");
                Ok(daemon)
            }
            ForkResult::Child => {
                self.forked = true;
                self.role = Role::Child;

                if let Err(errno) = setsid() {
                    let err = ProcessError::Session(errno);
                    error!(%err, "aborting daemonization");
                    std::process::exit(1);
                }

                // SAFETY: see above; this image becomes either the
                // short-lived intermediate or the daemon.
                match unsafe { fork() } {
                    Err(errno) => {
                        let err = ProcessError::Fork(errno);
                        error!(%err, "aborting daemonization");
                        std::process::exit(1);
                    }
                    Ok(ForkResult::Parent { child: daemon }) => {
                        // Intermediate image: report the daemon pid
                        // upward, then vanish so the daemon is
                        // reparented.
                        if let Err(err) = self.write(&daemon.as_raw()) {
                            error!(%err, "failed to report daemon pid");
                            std::process::exit(1);
                        }
                        let _ = self.close_ipc();
                        std::process::exit(0);
                    }
                    Ok(ForkResult::Child) => {
                        self.enter_child();
                        umask(Mode::empty());
                        if let Err(errno) = chdir("/") {
                            warn!(%errno, "failed to chdir to /");
                        }
                        callback(self, args);
                        self.exit_worker();
                    }
                }
            }
        }
    }

    fn enter_child(&mut self) {
        self.forked = true;
        self.role = Role::Child;
        self.pid = None;
        if let Some(name) = self.name.clone() {
            if let Err(err) = title::set_process_title(&name) {
                warn!(%err, "failed to set process title");
            }
        }
    }

    /// Write a serde value as one frame over the bound channel.
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = self.framer.seal(value)?;
        let ipc = self.bound_ipc()?;
        ipc.writer.send(&payload)?;
        Ok(())
    }

    /// Read one frame from the bound channel and decode it (blocking).
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        let frame = {
            let ipc = self.bound_ipc()?;
            // A prior non-blocking read_raw may have left the descriptor
            // non-blocking; framed reads always block.
            ipc.reader
                .get_ref()
                .set_nonblocking(false)
                .map_err(spawnkit_transport::ChannelError::from)?;
            ipc.reader.read_frame()?
        };
        Ok(self.framer.open(&frame)?)
    }

    /// Move raw bytes over the channel, bypassing framing.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<usize> {
        Ok(self.bound_ipc()?.writer.send_raw(bytes)?)
    }

    /// Receive one raw chunk, bypassing framing. Non-blocking mode
    /// returns an empty buffer when nothing is pending. Bytes already
    /// buffered by the framed reader are not visible here; a channel is
    /// used either framed or raw, not both at once.
    pub fn read_raw(&mut self, block: bool) -> Result<Vec<u8>> {
        Ok(self.bound_ipc()?.reader.get_mut().recv_chunk(block)?)
    }

    /// Release the channel's descriptors. Idempotent once bound; a usage
    /// error before any bind has occurred in this image.
    pub fn close_ipc(&mut self) -> Result<()> {
        if !self.bound_once {
            return Err(ProcessError::Usage("close_ipc before any channel bind"));
        }
        if matches!(self.ipc, IpcState::Bound(_)) {
            self.ipc = IpcState::Closed;
            debug!("closed ipc endpoint");
        }
        Ok(())
    }

    /// Remove the channel's filesystem backing (FIFO paths; socketpair
    /// channels have none). Idempotent once bound; a usage error before
    /// any bind has occurred in this image.
    pub fn clear_ipc(&mut self) -> Result<()> {
        if !self.bound_once {
            return Err(ProcessError::Usage("clear_ipc before any channel bind"));
        }
        if let Some(storage) = &self.storage {
            storage.clear()?;
        }
        Ok(())
    }

    /// Master-side: block until the spawned child exits and return its
    /// wait status. Fails for daemons (they are not our children once
    /// the intermediate exits) and when nothing was spawned.
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if self.role == Role::Child {
            return Err(ProcessError::Usage("wait() is a master-side call"));
        }
        let pid = self
            .pid
            .ok_or(ProcessError::Usage("no spawned worker to wait for"))?;
        waitpid(pid, None).map_err(ProcessError::Wait)
    }

    /// Bind the inherited channel with this image's role on first use.
    fn bound_ipc(&mut self) -> Result<&mut BoundIpc> {
        if !self.forked {
            return Err(ProcessError::Usage(
                "IPC before run(): the channel is bound only after fork",
            ));
        }
        if matches!(self.ipc, IpcState::Unbound) {
            let channel = self
                .channel
                .take()
                .ok_or(ProcessError::Usage("channel resource missing in this image"))?;
            let endpoint = channel.bind(self.role)?;
            let (rx, tx) = endpoint.into_split();
            self.ipc = IpcState::Bound(BoundIpc {
                reader: FrameReader::new(rx),
                writer: FrameWriter::new(tx),
            });
            self.bound_once = true;
            debug!(role = ?self.role, "bound ipc channel");
        }
        match &mut self.ipc {
            IpcState::Bound(bound) => Ok(bound),
            _ => Err(ProcessError::Usage("IPC channel is closed")),
        }
    }

    /// The single normal-exit routine for worker images: release the
    /// channel and its storage, then terminate. Never returns.
    fn exit_worker(&mut self) -> ! {
        if self.bound_once {
            let _ = self.close_ipc();
            let _ = self.clear_ipc();
        } else {
            // This image never participated in IPC: drop the inherited
            // descriptors and leave any filesystem paths to the master's
            // clear_ipc.
            self.channel = None;
        }
        debug!("worker image exiting");
        std::process::exit(0);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("role", &self.role)
            .field("forked", &self.forked)
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("daemonize", &self.options.daemonize)
            .field("kind", &self.options.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pre-fork state machine only. Forking behavior lives in the
    // spawnkit integration tests, one binary per process-global concern.

    fn idle_worker() -> Worker {
        Worker::new(|_, _| {}, WorkerOptions::default())
    }

    #[test]
    fn ipc_before_run_is_a_usage_error() {
        let mut worker = idle_worker();

        assert!(matches!(
            worker.read::<String>(),
            Err(ProcessError::Usage(_))
        ));
        assert!(matches!(
            worker.write(&"hi"),
            Err(ProcessError::Usage(_))
        ));
        assert!(matches!(
            worker.read_raw(false),
            Err(ProcessError::Usage(_))
        ));
        assert!(matches!(
            worker.write_raw(b"hi"),
            Err(ProcessError::Usage(_))
        ));
    }

    #[test]
    fn close_and_clear_before_bind_are_usage_errors() {
        let mut worker = idle_worker();

        assert!(matches!(worker.close_ipc(), Err(ProcessError::Usage(_))));
        assert!(matches!(worker.clear_ipc(), Err(ProcessError::Usage(_))));
    }

    #[test]
    fn pid_is_unset_before_run_on_master() {
        let mut worker = idle_worker();
        assert_eq!(worker.pid(), None);
    }

    #[test]
    fn set_name_before_fork_only_stores() {
        let mut worker = idle_worker();
        worker.set_name("pre-fork-name");
        assert_eq!(worker.name(), Some("pre-fork-name"));
        // The running image's title is untouched: no fork has happened.
        #[cfg(target_os = "linux")]
        {
            let comm = std::fs::read_to_string("/proc/thread-self/comm").unwrap();
            assert_ne!(comm.trim_end(), "pre-fork-name");
        }
    }

    #[test]
    fn wait_without_spawn_is_a_usage_error() {
        let mut worker = idle_worker();
        assert!(matches!(worker.wait(), Err(ProcessError::Usage(_))));
    }
}
