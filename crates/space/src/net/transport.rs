use std::future::Future;
use std::net::SocketAddr;

use super::{ControlError, ControlMessage, TransportKind};

/// A way of reaching the control server and opening data transports.
pub trait NetworkTransport: Send + Sync + 'static {
    type Control: ControlChannel + 'static;
    type Data: DataChannel + 'static;

    fn connect_control(&self) -> impl Future<Output = Result<Self::Control, ControlError>> + Send;

    /// Opens the local end of a data transport toward `remote`.
    fn open_data(
        &self,
        kind: TransportKind,
        remote: SocketAddr,
    ) -> impl Future<Output = Result<Self::Data, ControlError>> + Send;
}

/// Ordered, reliable message channel.
pub trait ControlChannel: Send {
    fn send(
        &mut self,
        message: &ControlMessage,
    ) -> impl Future<Output = Result<(), ControlError>> + Send;

    /// Next inbound message; `None` once the peer has closed the channel.
    ///
    /// Must be cancel safe: it is polled from `select!`.
    fn recv(&mut self) -> impl Future<Output = Option<Result<ControlMessage, ControlError>>> + Send;
}

/// Unordered, unreliable datagram channel. No retransmission.
pub trait DataChannel: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), ControlError>> + Send;

    /// Next datagram. Cancel safe.
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, ControlError>> + Send;
}
