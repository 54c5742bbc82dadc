//! Process-wide collection of terminated children.
//!
//! Nothing here is installed automatically: the `SIGCHLD` disposition is
//! only touched when [`on_collect`] is called. Install state is explicit
//! process-global state with a guard, so repeated installs just swap the
//! handler and [`uninstall`] restores the default disposition.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use tracing::debug;

use crate::error::{ProcessError, Result};

/// A replacement collection handler.
///
/// Runs in signal context: it must stay async-signal-safe (syscalls only,
/// no allocation, no locks, no logging).
pub type CollectHandler = fn();

// 0 = default handler (drain every terminated child).
static HANDLER: AtomicUsize = AtomicUsize::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn dispatch(_signo: libc::c_int) {
    let raw = HANDLER.load(Ordering::Relaxed);
    if raw == 0 {
        reap_pending();
    } else {
        // SAFETY: `raw` was stored from a `CollectHandler` fn pointer in
        // `on_collect` and never from anything else.
        let handler: CollectHandler = unsafe { std::mem::transmute(raw) };
        handler();
    }
}

/// Install a child-termination notification handler.
///
/// `None` installs the default handler, which non-blockingly reaps every
/// currently terminated child in a loop until none remain. `Some(f)`
/// fully replaces the default. Calling again swaps the handler in place;
/// the signal disposition is installed only once.
pub fn on_collect(handler: Option<CollectHandler>) -> Result<()> {
    HANDLER.store(
        handler.map(|f| f as usize).unwrap_or(0),
        Ordering::Relaxed,
    );

    if !INSTALLED.swap(true, Ordering::SeqCst) {
        let action = SigAction::new(
            SigHandler::Handler(dispatch),
            SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
            SigSet::empty(),
        );
        // SAFETY: `dispatch` is async-signal-safe; it performs waitpid
        // syscalls or calls a handler documented to be signal-safe.
        if let Err(err) = unsafe { sigaction(Signal::SIGCHLD, &action) } {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(ProcessError::Signal(err));
        }
        debug!("installed SIGCHLD collection handler");
    }
    Ok(())
}

/// Restore the default `SIGCHLD` disposition. Idempotent.
pub fn uninstall() -> Result<()> {
    if INSTALLED.swap(false, Ordering::SeqCst) {
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: restoring SIG_DFL.
        unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(ProcessError::Signal)?;
        HANDLER.store(0, Ordering::Relaxed);
        debug!("removed SIGCHLD collection handler");
    }
    Ok(())
}

/// Drain every currently terminated child without blocking.
///
/// Returns the number of children reaped. "No terminated child pending"
/// is a normal outcome of one attempt, repeated until exhausted; an
/// `ECHILD` result means there is nothing left to collect.
pub fn reap_pending() -> usize {
    let mut reaped = 0;
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => reaped += 1,
            Err(_) => break,
        }
    }
    reaped
}

/// Park the calling process forever, dispatching pending termination
/// notifications as they arrive.
///
/// Intended for a long-lived master with no other work loop. There is no
/// way out short of a terminating signal.
pub fn collect() -> ! {
    loop {
        // SAFETY: pause has no memory side effects; it returns whenever a
        // handler ran, after which we simply park again.
        unsafe { libc::pause() };
    }
}
