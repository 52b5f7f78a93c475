use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::media::{Channel, MediaKind};
use crate::protocol::Message;
use crate::session::PortPair;

const DATAGRAM_MAX: usize = 8192;

/// Attempts at finding an even/odd port pair before giving up.
const PAIR_ATTEMPTS: usize = 32;

fn unspecified(like: IpAddr) -> IpAddr {
    match like {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// SIP control socket: one datagram is one message.
#[derive(Debug)]
pub struct DatagramControl {
    socket: UdpSocket,
    pending: VecDeque<Message>,
}

impl DatagramControl {
    /// Bind `port` on every local address of `peer`'s family and connect
    /// to `peer`.
    pub async fn connect(port: u16, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(unspecified(peer.ip()), port)).await?;
        socket.connect(peer).await?;
        tracing::info!(%peer, local_port = port, "SIP socket ready");
        Ok(Self {
            socket,
            pending: VecDeque::new(),
        })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    pub async fn readable(&self) -> Result<()> {
        Ok(self.socket.readable().await?)
    }

    /// Read every queued datagram. Unparsable datagrams and ICMP
    /// unreachable reports are logged and dropped.
    pub fn try_receive(&mut self) -> Result<usize> {
        let mut buf = [0u8; DATAGRAM_MAX];
        let mut received = 0;
        loop {
            match self.socket.try_recv(&mut buf) {
                Ok(n) => match Message::parse(&buf[..n]) {
                    Ok(message) => {
                        self.pending.push_back(message);
                        received += 1;
                    }
                    Err(error) => tracing::warn!(%error, len = n, "unparsable SIP datagram"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(received),
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    tracing::warn!("SIP peer unreachable");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn next_message(&mut self) -> Result<Option<Message>> {
        Ok(self.pending.pop_front())
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.socket.send(bytes).await?;
        Ok(())
    }
}

/// RTP socket on an even port and RTCP on the next one.
#[derive(Debug)]
pub struct MediaPair {
    rtp: UdpSocket,
    rtcp: UdpSocket,
    ports: PortPair,
}

impl MediaPair {
    /// Bind an even/odd pair on every local address of `family`'s kind.
    pub async fn bind(family: IpAddr) -> Result<Self> {
        let ip = unspecified(family);
        for _ in 0..PAIR_ATTEMPTS {
            let first = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
            let port = first.local_addr()?.port();

            let (rtp, rtp_port) = if port % 2 == 0 {
                (first, port)
            } else {
                let Some(even) = port.checked_add(1) else {
                    continue;
                };
                match UdpSocket::bind(SocketAddr::new(ip, even)).await {
                    Ok(socket) => (socket, even),
                    Err(_) => continue,
                }
            };
            let Some(rtcp_port) = rtp_port.checked_add(1) else {
                continue;
            };
            if let Ok(rtcp) = UdpSocket::bind(SocketAddr::new(ip, rtcp_port)).await {
                let ports = PortPair {
                    rtp: rtp_port,
                    rtcp: rtcp_port,
                };
                tracing::debug!(rtp = ports.rtp, rtcp = ports.rtcp, "media ports bound");
                return Ok(Self { rtp, rtcp, ports });
            }
        }
        Err(Error::Transport(io::Error::new(
            ErrorKind::AddrInUse,
            "no even/odd UDP port pair available",
        )))
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub fn socket(&self, channel: Channel) -> &UdpSocket {
        match channel {
            Channel::Rtp => &self.rtp,
            Channel::Rtcp => &self.rtcp,
        }
    }

    pub async fn connect(&self, channel: Channel, peer: SocketAddr) -> Result<()> {
        self.socket(channel).connect(peer).await?;
        tracing::debug!(?channel, %peer, "media socket connected");
        Ok(())
    }

    /// Non-blocking send on a connected socket.
    pub fn try_send(&self, channel: Channel, bytes: &[u8]) -> io::Result<usize> {
        self.socket(channel).try_send(bytes)
    }
}

/// The media pairs of one leg.
#[derive(Debug, Default)]
pub struct MediaSockets {
    pub audio: Option<MediaPair>,
    pub video: Option<MediaPair>,
}

impl MediaSockets {
    pub fn get(&self, kind: MediaKind) -> Option<&MediaPair> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    /// Resolves once any socket of the leg is readable.
    pub async fn readable(&self) -> (MediaKind, Channel) {
        async fn ready(pair: Option<&MediaPair>, channel: Channel) {
            match pair {
                Some(pair) => {
                    if let Err(error) = pair.socket(channel).readable().await {
                        tracing::warn!(%error, ?channel, "media readiness failed");
                    }
                }
                None => std::future::pending().await,
            }
        }

        let (audio, video) = (self.audio.as_ref(), self.video.as_ref());
        tokio::select! {
            () = ready(audio, Channel::Rtp) => (MediaKind::Audio, Channel::Rtp),
            () = ready(audio, Channel::Rtcp) => (MediaKind::Audio, Channel::Rtcp),
            () = ready(video, Channel::Rtp) => (MediaKind::Video, Channel::Rtp),
            () = ready(video, Channel::Rtcp) => (MediaKind::Video, Channel::Rtcp),
        }
    }
}
