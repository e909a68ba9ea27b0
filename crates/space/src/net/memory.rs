//! In-process transport. Control is a pair of unbounded channels, data goes
//! through a shared switchboard of fake socket addresses. A datagram sent to
//! an address nobody holds is dropped, like UDP.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::{
    ControlChannel, ControlError, ControlMessage, DataChannel, NetworkTransport, TransportKind,
};

type Datagram = (SocketAddr, Vec<u8>);

#[derive(Default)]
struct Switchboard {
    listener: Mutex<Option<mpsc::UnboundedSender<MemoryControl>>>,
    endpoints: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>>,
    next_port: AtomicU16,
}

impl Switchboard {
    fn bind(self: &Arc<Self>) -> MemoryData {
        let port = 10_000 + self.next_port.fetch_add(1, Ordering::Relaxed);
        let local = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let (tx, rx) = mpsc::unbounded_channel();

        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local, tx);

        MemoryData {
            board: Arc::clone(self),
            local,
            remote: None,
            inbox: rx,
        }
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, frame: &[u8]) -> bool {
        let endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        endpoints
            .get(&to)
            .is_some_and(|tx| tx.send((from, frame.to_vec())).is_ok())
    }

    fn unbind(&self, addr: SocketAddr) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&addr);
    }
}

/// Client side handle of the in-memory network.
#[derive(Clone)]
pub struct MemoryNetwork {
    board: Arc<Switchboard>,
}

/// Server side: accepts control connections and binds data endpoints.
pub struct MemoryServer {
    board: Arc<Switchboard>,
    incoming: mpsc::UnboundedReceiver<MemoryControl>,
}

impl MemoryNetwork {
    pub fn new() -> (Self, MemoryServer) {
        let board = Arc::new(Switchboard::default());
        let (tx, rx) = mpsc::unbounded_channel();
        *board
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);

        (
            Self {
                board: Arc::clone(&board),
            },
            MemoryServer {
                board,
                incoming: rx,
            },
        )
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryControl> {
        self.incoming.recv().await
    }

    /// An unconnected data endpoint, addressed with [`MemoryData::send_to`].
    pub fn bind_data(&self) -> MemoryData {
        self.board.bind()
    }
}

impl Drop for MemoryServer {
    fn drop(&mut self) {
        self.board
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl NetworkTransport for MemoryNetwork {
    type Control = MemoryControl;
    type Data = MemoryData;

    async fn connect_control(&self) -> Result<MemoryControl, ControlError> {
        let (client, server) = MemoryControl::pair();
        let listener = self
            .board
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match listener {
            Some(tx) if tx.send(server).is_ok() => Ok(client),
            _ => Err(ControlError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory server is gone",
            ))),
        }
    }

    async fn open_data(
        &self,
        kind: TransportKind,
        remote: SocketAddr,
    ) -> Result<MemoryData, ControlError> {
        let mut data = self.board.bind();
        data.remote = Some(remote);
        log::debug!("Opened {kind} memory transport {} -> {remote}", data.local);
        Ok(data)
    }
}

/// One end of an in-memory control connection.
pub struct MemoryControl {
    tx: mpsc::UnboundedSender<ControlMessage>,
    rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl MemoryControl {
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: b_rx },
            Self { tx: b_tx, rx: a_rx },
        )
    }
}

impl ControlChannel for MemoryControl {
    async fn send(&mut self, message: &ControlMessage) -> Result<(), ControlError> {
        self.tx
            .send(message.clone())
            .map_err(|_| ControlError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<ControlMessage, ControlError>> {
        self.rx.recv().await.map(Ok)
    }
}

pub struct MemoryData {
    board: Arc<Switchboard>,
    local: SocketAddr,
    remote: Option<SocketAddr>,
    inbox: mpsc::UnboundedReceiver<Datagram>,
}

impl MemoryData {
    /// Sends to an explicit address; `false` when nothing is bound there.
    pub fn send_to(&self, frame: &[u8], to: SocketAddr) -> bool {
        self.board.deliver(self.local, to, frame)
    }

    pub async fn recv_from(&mut self) -> Option<Datagram> {
        self.inbox.recv().await
    }
}

impl DataChannel for MemoryData {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn send(&self, frame: &[u8]) -> Result<(), ControlError> {
        if let Some(remote) = self.remote
            && !self.send_to(frame, remote)
        {
            log::trace!("Dropped datagram to {remote}");
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ControlError> {
        loop {
            let Some((from, frame)) = self.inbox.recv().await else {
                return Err(ControlError::Closed);
            };
            if self.remote.is_none_or(|remote| remote == from) {
                return Ok(frame);
            }
        }
    }
}

impl Drop for MemoryData {
    fn drop(&mut self) {
        self.board.unbind(self.local);
    }
}
