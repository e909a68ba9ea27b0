use std::net::{Ipv4Addr, SocketAddr};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};

use super::{
    ControlChannel, ControlError, ControlMessage, DataChannel, FRAME_LEN, NetworkTransport,
    TransportKind,
};

/// Large enough for any datagram we accept; oversized ones are rejected by the frame codec.
const RECV_BUFFER: usize = 512;

/// Newline-delimited JSON over TCP for control, connected UDP sockets for data.
#[derive(Debug, Clone)]
pub struct TcpNetwork {
    server: SocketAddr,
}

impl TcpNetwork {
    pub fn new(server: SocketAddr) -> Self {
        Self { server }
    }
}

impl NetworkTransport for TcpNetwork {
    type Control = TcpControl;
    type Data = UdpData;

    async fn connect_control(&self) -> Result<TcpControl, ControlError> {
        let stream = TcpStream::connect(self.server).await?;
        stream.set_nodelay(true)?;
        log::debug!("Control connected to {}", self.server);
        Ok(TcpControl::new(stream))
    }

    async fn open_data(
        &self,
        kind: TransportKind,
        remote: SocketAddr,
    ) -> Result<UdpData, ControlError> {
        let bind: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(remote).await?;
        let local = socket.local_addr()?;
        log::debug!("Opened {kind} data transport {local} -> {remote}");

        Ok(UdpData { socket, local })
    }
}

pub struct TcpControl {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TcpControl {
    pub fn new(stream: TcpStream) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }
}

impl ControlChannel for TcpControl {
    async fn send(&mut self, message: &ControlMessage) -> Result<(), ControlError> {
        let mut line = message.encode()?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ControlMessage, ControlError>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some(ControlMessage::decode(&line)),
                Ok(None) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

pub struct UdpData {
    socket: UdpSocket,
    local: SocketAddr,
}

impl DataChannel for UdpData {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn send(&self, frame: &[u8]) -> Result<(), ControlError> {
        self.socket.send(frame).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ControlError> {
        let mut buf = [0u8; RECV_BUFFER];
        let len = self.socket.recv(&mut buf).await?;
        if len != FRAME_LEN {
            log::trace!("Datagram of {len} bytes on data transport");
        }
        Ok(buf[..len].to_vec())
    }
}
