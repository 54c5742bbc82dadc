use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{ChannelError, Result};

/// Which side of the fork an image plays on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The image that called fork and kept running.
    Master,
    /// The forked worker image.
    Child,
}

/// Transport selector for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Connected `socketpair`: full duplex on one inherited resource.
    Socket,
    /// Two named FIFOs, one per direction, under a private directory.
    Fifo,
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// An unbound, fork-inheritable channel resource.
///
/// Create before fork; after fork each image holds an independent copy of
/// the pre-bind state and differentiates it by calling [`Channel::bind`]
/// with its own role.
#[derive(Debug)]
pub struct Channel {
    inner: ChannelInner,
}

#[derive(Debug)]
enum ChannelInner {
    Socket(SocketPair),
    Fifo(FifoPair),
}

impl Channel {
    /// Acquire the pre-fork transport resource for `kind`.
    pub fn create(kind: ChannelKind) -> Result<Self> {
        let inner = match kind {
            ChannelKind::Socket => ChannelInner::Socket(SocketPair::create()?),
            ChannelKind::Fifo => ChannelInner::Fifo(FifoPair::create()?),
        };
        Ok(Self { inner })
    }

    /// The transport kind of this channel.
    pub fn kind(&self) -> ChannelKind {
        match self.inner {
            ChannelInner::Socket(_) => ChannelKind::Socket,
            ChannelInner::Fifo(_) => ChannelKind::Fifo,
        }
    }

    /// Filesystem footprint to remove on `clear` (empty for sockets).
    pub fn storage(&self) -> ChannelStorage {
        match &self.inner {
            ChannelInner::Socket(_) => ChannelStorage::default(),
            ChannelInner::Fifo(pair) => ChannelStorage {
                paths: vec![pair.to_child.clone(), pair.to_master.clone()],
                dir: Some(pair.dir.clone()),
            },
        }
    }

    /// Differentiate the shared resource into this image's endpoint.
    ///
    /// Consumes the unbound channel: binding happens at most once per
    /// image. The socket variant closes the end the role does not use;
    /// the fifo variant performs the role-ordered blocking opens.
    pub fn bind(self, role: Role) -> Result<Endpoint> {
        match self.inner {
            ChannelInner::Socket(pair) => pair.bind(role),
            ChannelInner::Fifo(pair) => pair.bind(role),
        }
    }

    /// Bind both roles inside one image, returning the differentiated
    /// endpoint pair atomically. Socket channels only: a fifo open blocks
    /// until the peer image opens the complementary end.
    pub fn split(self) -> Result<(Endpoint, Endpoint)> {
        match self.inner {
            ChannelInner::Socket(pair) => pair.split(),
            ChannelInner::Fifo(_) => Err(ChannelError::SplitUnsupported),
        }
    }
}

/// Connected socketpair created before fork.
#[derive(Debug)]
struct SocketPair {
    master: UnixStream,
    child: UnixStream,
}

impl SocketPair {
    fn create() -> Result<Self> {
        let (master, child) = UnixStream::pair().map_err(ChannelError::Pair)?;
        debug!("created socketpair channel");
        Ok(Self { master, child })
    }

    fn bind(self, role: Role) -> Result<Endpoint> {
        // Keep the role's end; dropping the other closes this image's copy
        // of that descriptor.
        let keep = match role {
            Role::Master => self.master,
            Role::Child => self.child,
        };
        let rx = keep.try_clone().map_err(ChannelError::Io)?;
        debug!(?role, "bound socket endpoint");
        Ok(Endpoint::from_socket(rx, keep, role))
    }

    fn split(self) -> Result<(Endpoint, Endpoint)> {
        let master_rx = self.master.try_clone().map_err(ChannelError::Io)?;
        let child_rx = self.child.try_clone().map_err(ChannelError::Io)?;
        Ok((
            Endpoint::from_socket(master_rx, self.master, Role::Master),
            Endpoint::from_socket(child_rx, self.child, Role::Child),
        ))
    }
}

/// Two named FIFOs created before fork under a private directory.
///
/// `to_child` carries master→child traffic, `to_master` the reverse.
#[derive(Debug)]
struct FifoPair {
    dir: PathBuf,
    to_child: PathBuf,
    to_master: PathBuf,
}

impl FifoPair {
    const FIFO_MODE: Mode = Mode::S_IRUSR.union(Mode::S_IWUSR);

    fn create() -> Result<Self> {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("spawnkit-ch-{}-{id}", std::process::id()));
        std::fs::create_dir_all(&dir).map_err(ChannelError::Io)?;

        let to_child = dir.join("to-child.pipe");
        let to_master = dir.join("to-master.pipe");
        for path in [&to_child, &to_master] {
            mkfifo(path, Self::FIFO_MODE).map_err(|source| ChannelError::CreateFifo {
                path: path.clone(),
                source,
            })?;
        }

        debug!(?dir, "created fifo channel");
        Ok(Self {
            dir,
            to_child,
            to_master,
        })
    }

    /// Opening a FIFO for reading blocks until a writer opens it, and vice
    /// versa. The open order is therefore fixed per role so the two images
    /// unblock each other pairwise:
    ///
    /// master: read `to_master`, then write `to_child`
    /// child:  write `to_master`, then read `to_child`
    fn bind(self, role: Role) -> Result<Endpoint> {
        let open_read = |path: &PathBuf| {
            std::fs::OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|source| ChannelError::OpenFifo {
                    path: path.clone(),
                    source,
                })
        };
        let open_write = |path: &PathBuf| {
            std::fs::OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|source| ChannelError::OpenFifo {
                    path: path.clone(),
                    source,
                })
        };

        let (rx, tx) = match role {
            Role::Master => {
                let rx = open_read(&self.to_master)?;
                let tx = open_write(&self.to_child)?;
                (rx, tx)
            }
            Role::Child => {
                let tx = open_write(&self.to_master)?;
                let rx = open_read(&self.to_child)?;
                (rx, tx)
            }
        };

        debug!(?role, dir = ?self.dir, "bound fifo endpoint");
        Ok(Endpoint::from_fifo(rx, tx, role))
    }
}

/// Filesystem paths backing a channel, removable independently of any
/// still-open descriptors.
#[derive(Debug, Clone, Default)]
pub struct ChannelStorage {
    paths: Vec<PathBuf>,
    dir: Option<PathBuf>,
}

impl ChannelStorage {
    /// Whether this channel left anything on the filesystem.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.dir.is_none()
    }

    /// Unlink the backing paths. Missing files are fine: clear is
    /// idempotent and either image may get there first.
    pub fn clear(&self) -> Result<()> {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(?path, "removed channel fifo"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ChannelError::Clear {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }
        if let Some(dir) = &self.dir {
            match std::fs::remove_dir(dir) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                // Leave non-empty directories alone; the peer may still be
                // creating its side.
                Err(err) if err.raw_os_error() == Some(libc::ENOTEMPTY) => {}
                Err(source) => {
                    return Err(ChannelError::Clear {
                        path: dir.clone(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}
