//! Listener handoff
//!
//! On SIGUSR2 the listening socket is handed to a freshly spawned copy of
//! the running executable, which adopts it through `ESSYNC_LISTEN_FD`
//! instead of binding, and this process then shuts down. SIGINT and SIGTERM
//! shut down without a successor.
//!
//! ```text
//! Listening ──SIGUSR2──▶ ReloadRequested ──spawned──▶ HandoffComplete
//!     ▲                        │
//!     └──────spawn failed──────┘
//! Listening ──SIGINT/SIGTERM──▶ ShutdownComplete
//! ```

use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::process::Command;

use rustix::io::{fcntl_setfd, FdFlags};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{ServerError, ServerResult};

/// Environment variable carrying the inherited listener descriptor
pub const LISTEN_FD_ENV: &str = "ESSYNC_LISTEN_FD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    ReloadRequested,
    /// A successor owns the listener now
    HandoffComplete,
    ShutdownComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    Reload,
    Shutdown,
    SuccessorStarted,
    SuccessorFailed,
}

impl ListenerState {
    pub fn on(self, event: ListenerEvent) -> Self {
        use ListenerEvent::*;
        use ListenerState::*;

        match (self, event) {
            (Listening, Reload) => ReloadRequested,
            (ReloadRequested, SuccessorStarted) => HandoffComplete,
            (ReloadRequested, SuccessorFailed) => Listening,
            (Listening | ReloadRequested, Shutdown) => ShutdownComplete,
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ListenerState::HandoffComplete | ListenerState::ShutdownComplete
        )
    }

    /// The PID file belongs to the successor after a handoff
    pub fn removes_pid_file(self) -> bool {
        self == ListenerState::ShutdownComplete
    }
}

/// Adopt the listener named by `ESSYNC_LISTEN_FD`, or bind `0.0.0.0:port`
pub fn bind_or_inherit(port: u16) -> ServerResult<TcpListener> {
    let listener = match std::env::var(LISTEN_FD_ENV) {
        Ok(value) => {
            let listener = inherit(&value)?;
            info!("Adopted inherited listener on {}", listener.local_addr()?);
            listener
        }
        Err(_) => {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?
        }
    };

    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn inherit(value: &str) -> ServerResult<TcpListener> {
    let invalid = || ServerError::InvalidListenFd {
        value: value.to_string(),
    };

    let fd: RawFd = value
        .trim()
        .parse()
        .ok()
        .filter(|fd| *fd > 2)
        .ok_or_else(invalid)?;

    // SAFETY: the descriptor was left open across exec by the predecessor
    // for this process alone, and nothing else here has taken ownership.
    let listener = unsafe { TcpListener::from_raw_fd(fd) };
    listener.local_addr().map_err(|_| invalid())?;
    Ok(listener)
}

/// Spawn the current executable with the same arguments, passing it a
/// duplicate of `listener` that survives exec. Returns the child's PID.
pub fn spawn_successor(listener: &TcpListener) -> ServerResult<u32> {
    let inheritable: OwnedFd = listener.try_clone()?.into();
    fcntl_setfd(&inheritable, FdFlags::empty()).map_err(std::io::Error::from)?;

    let exe = std::env::current_exe()?;
    let child = Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .env(LISTEN_FD_ENV, inheritable.as_raw_fd().to_string())
        .spawn()
        .map_err(|e| ServerError::Handoff(format!("failed to spawn {}: {}", exe.display(), e)))?;

    // The child holds its own copy from here on.
    drop(inheritable);
    Ok(child.id())
}

/// Process signals relevant to the listener
pub struct Signals {
    reload: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl Signals {
    pub fn new() -> ServerResult<Self> {
        Ok(Self {
            reload: signal(SignalKind::user_defined2())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    pub async fn recv(&mut self) -> ListenerEvent {
        tokio::select! {
            _ = self.reload.recv() => ListenerEvent::Reload,
            _ = self.interrupt.recv() => ListenerEvent::Shutdown,
            _ = self.terminate.recv() => ListenerEvent::Shutdown,
        }
    }
}

/// Drive the listener state machine until a terminal state, then cancel
/// `shutdown`. Cancelling `shutdown` from elsewhere counts as a shutdown
/// signal.
pub async fn supervise(
    listener: &TcpListener,
    signals: &mut Signals,
    shutdown: &CancellationToken,
) -> ListenerState {
    let mut state = ListenerState::Listening;

    while !state.is_terminal() {
        let event = tokio::select! {
            event = signals.recv() => event,
            _ = shutdown.cancelled() => ListenerEvent::Shutdown,
        };
        state = state.on(event);

        if state == ListenerState::ReloadRequested {
            info!("Reload requested, handing listener to a new process");
            let outcome = match spawn_successor(listener) {
                Ok(pid) => {
                    info!("Successor started with PID {}", pid);
                    ListenerEvent::SuccessorStarted
                }
                Err(e) => {
                    error!("{}", e);
                    ListenerEvent::SuccessorFailed
                }
            };
            state = state.on(outcome);
        }
    }

    info!("Listener {:?}, shutting down", state);
    shutdown.cancel();
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;

    #[test]
    fn test_reload_transitions() {
        let state = ListenerState::Listening.on(ListenerEvent::Reload);
        assert_eq!(state, ListenerState::ReloadRequested);

        assert_eq!(
            state.on(ListenerEvent::SuccessorStarted),
            ListenerState::HandoffComplete
        );
        assert_eq!(
            state.on(ListenerEvent::SuccessorFailed),
            ListenerState::Listening
        );
    }

    #[test]
    fn test_shutdown_transitions() {
        let state = ListenerState::Listening.on(ListenerEvent::Shutdown);
        assert_eq!(state, ListenerState::ShutdownComplete);
        assert!(state.is_terminal());
        assert!(state.removes_pid_file());

        let handed_off = ListenerState::HandoffComplete;
        assert_eq!(handed_off.on(ListenerEvent::Shutdown), handed_off);
        assert!(!handed_off.removes_pid_file());

        assert_eq!(
            ListenerState::Listening.on(ListenerEvent::SuccessorStarted),
            ListenerState::Listening
        );
    }

    #[test]
    fn test_inherit_listener() {
        let original = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = original.local_addr().unwrap();
        let fd = original.into_raw_fd();

        let adopted = inherit(&fd.to_string()).unwrap();
        assert_eq!(adopted.local_addr().unwrap(), addr);
    }

    #[test]
    fn test_inherit_rejects_bad_descriptor() {
        for value in ["", "abc", "1", "-4"] {
            assert!(matches!(
                inherit(value),
                Err(ServerError::InvalidListenFd { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_supervise_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut signals = Signals::new().unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let state = supervise(&listener, &mut signals, &shutdown).await;
        assert_eq!(state, ListenerState::ShutdownComplete);
    }
}
