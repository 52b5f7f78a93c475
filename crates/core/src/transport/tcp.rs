use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::{Message, MessageBuffer};

const READ_CHUNK: usize = 4096;

/// RTSP control connection.
///
/// Reads are non-blocking: [`try_receive`](Self::try_receive) pulls
/// whatever the socket holds into a [`MessageBuffer`], and complete
/// messages are taken out with [`next_message`](Self::next_message).
/// A partial message simply stays buffered until the next wake-up.
#[derive(Debug)]
pub struct StreamControl {
    stream: TcpStream,
    buffer: MessageBuffer,
    peer: SocketAddr,
}

impl StreamControl {
    pub async fn connect(host_port: &str) -> Result<Self> {
        let stream = TcpStream::connect(host_port).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        tracing::info!(%peer, "control connection established");
        Ok(Self {
            stream,
            buffer: MessageBuffer::new(),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    pub async fn readable(&self) -> Result<()> {
        Ok(self.stream.readable().await?)
    }

    /// Drain the socket into the buffer. A closed connection is a
    /// transport error.
    pub fn try_receive(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        loop {
            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    return Err(Error::Transport(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "control connection closed by peer",
                    )));
                }
                Ok(n) => {
                    self.buffer.extend(&chunk[..n])?;
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(total),
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn next_message(&mut self) -> Result<Option<Message>> {
        self.buffer.next_message()
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }
}
