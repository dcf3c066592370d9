//! Background thread that drives a pending handshake.
//!
//! The worker is idle on its command channel until the session hands it a
//! [`NetLink`]. It then polls the engine every `poll_interval` until the
//! handshake leaves Pending, and sends the link back. The returned link is the
//! pause acknowledgement: once the session holds it again, the worker no longer
//! has the transport.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

use crate::error::{NetError, Result};
use crate::sync::{SyncEngine, SyncState};
use crate::transport::{Datagram, Transport};

/// Engine and transport, always moved together.
pub struct NetLink {
    /// Handshake state machine.
    pub engine: SyncEngine,
    /// The node's only transport.
    pub transport: Box<dyn Transport>,
}

enum Command {
    Run(Box<NetLink>),
    Inject(Datagram),
    Pause,
    Shutdown,
}

/// Handle to the sync thread.
pub struct SyncWorker {
    commands: Sender<Command>,
    returned: Receiver<Box<NetLink>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Starts the thread.
    pub fn spawn() -> Result<Self> {
        let (commands, command_rx) = unbounded();
        let (returned_tx, returned) = unbounded();
        let handle = std::thread::Builder::new()
            .name("strand-sync".into())
            .spawn(move || worker_loop(&command_rx, &returned_tx))
            .map_err(|_| NetError::ThreadControlFailed("could not spawn the sync thread"))?;
        Ok(Self {
            commands,
            returned,
            handle: Some(handle),
        })
    }

    /// Hands a link to the worker and starts polling it.
    pub fn run(&self, link: Box<NetLink>) -> Result<()> {
        self.commands
            .send(Command::Run(link))
            .map_err(|_| NetError::ThreadControlFailed("sync thread is gone"))
    }

    /// Forwards a datagram the host received on the worker's behalf.
    pub fn inject(&self, datagram: Datagram) -> Result<()> {
        self.commands
            .send(Command::Inject(datagram))
            .map_err(|_| NetError::ThreadControlFailed("sync thread is gone"))
    }

    /// Asks the worker to abandon the running handshake.
    pub fn pause(&self) -> Result<()> {
        self.commands
            .send(Command::Pause)
            .map_err(|_| NetError::ThreadControlFailed("sync thread is gone"))
    }

    /// Returns the link if the worker has finished with it.
    pub fn try_take(&self) -> Result<Option<Box<NetLink>>> {
        match self.returned.try_recv() {
            Ok(link) => Ok(Some(link)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(NetError::ThreadControlFailed("sync thread exited"))
            }
        }
    }

    /// Waits up to `timeout` for the worker to return the link.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Option<Box<NetLink>>> {
        match self.returned.recv_timeout(timeout) {
            Ok(link) => Ok(Some(link)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(NetError::ThreadControlFailed("sync thread exited"))
            }
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("sync thread panicked");
        }
    }
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker").finish_non_exhaustive()
    }
}

fn worker_loop(commands: &Receiver<Command>, returned: &Sender<Box<NetLink>>) {
    while let Ok(command) = commands.recv() {
        match command {
            Command::Run(link) => {
                let (link, shutdown) = drive(link, commands);
                if returned.send(link).is_err() || shutdown {
                    return;
                }
            }
            Command::Inject(d) => {
                tracing::debug!(from = %d.from, "no handshake running; dropping datagram");
            }
            Command::Pause => {}
            Command::Shutdown => return,
        }
    }
}

/// Polls until the handshake leaves Pending. The flag is set when a shutdown
/// arrived mid-handshake.
fn drive(mut link: Box<NetLink>, commands: &Receiver<Command>) -> (Box<NetLink>, bool) {
    let interval = link.engine.policy().poll_interval;
    loop {
        let NetLink { engine, transport } = &mut *link;
        if engine.poll(transport.as_mut(), Instant::now()) != SyncState::Pending {
            return (link, false);
        }
        // Sleeping on the command channel lets injected datagrams and pauses
        // wake the worker early.
        match commands.recv_timeout(interval) {
            Ok(Command::Inject(d)) => engine.handle(transport.as_mut(), d.from, &d.bytes),
            Ok(Command::Pause) => {
                engine.cancel(transport.as_mut());
                return (link, false);
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                engine.cancel(transport.as_mut());
                return (link, true);
            }
            Ok(Command::Run(_)) => {
                tracing::warn!("sync already running; ignoring second link");
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}
