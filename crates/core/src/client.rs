use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::media::rtcp::contains_bye;
use crate::media::rtp::start_packet;
use crate::media::{AudioSender, Channel, Codec, CodecSet, MediaKind, RtpPacket};
use crate::protocol::USER_AGENT;
use crate::session::rtsp::{DEFAULT_REPORT_INTERVAL, RtspClient, RtspConfig, RtspState};
use crate::session::sip::{
    DEFAULT_BYE_WAIT, DEFAULT_REALM, DEFAULT_SIP_PORT, SipAgent, SipConfig, SipState, choose_offer,
};
use crate::session::{ControlProtocol, LegEvent, MediaPorts, Session, SharedRng};
use crate::transport::{ControlChannel, DatagramControl, MediaPair, MediaSockets, StreamControl};
use crate::uri::TargetUri;

/// Longest the loop sleeps with nothing ready.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(4);

/// User part of the local SIP URI.
pub const DEFAULT_LOCAL_USER: &str = "rtspsip";

/// Samples assumed for the first inbound audio packet (20 ms at 8 kHz).
const FIRST_AUDIO_SAMPLES: u32 = 160;

const MEDIA_DATAGRAM_MAX: usize = 65_536;

/// SIP back-channel settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipSettings {
    /// Digest realm the camera must present.
    pub realm: String,
    /// Camera SIP port.
    pub port: u16,
    /// Local SIP port. `None` binds the camera's port, `Some(0)` any port.
    pub local_port: Option<u16>,
}

impl Default for SipSettings {
    fn default() -> Self {
        Self {
            realm: DEFAULT_REALM.to_string(),
            port: DEFAULT_SIP_PORT,
            local_port: None,
        }
    }
}

/// Everything one session needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub target: TargetUri,
    /// `None` disables the SIP leg.
    pub sip: Option<SipSettings>,
    pub idle_wait: Duration,
    pub report_interval: Duration,
    pub bye_wait: Duration,
    pub user_agent: String,
    pub local_user: String,
    /// Set up the camera's audio track.
    pub ingest_audio: bool,
}

impl ClientConfig {
    pub fn new(target: TargetUri) -> Self {
        Self {
            target,
            sip: None,
            idle_wait: DEFAULT_IDLE_WAIT,
            report_interval: DEFAULT_REPORT_INTERVAL,
            bye_wait: DEFAULT_BYE_WAIT,
            user_agent: USER_AGENT.to_string(),
            local_user: DEFAULT_LOCAL_USER.to_string(),
            ingest_audio: true,
        }
    }
}

/// The telephony side of a session.
pub trait Host {
    /// Codecs the host can consume.
    fn capabilities(&self) -> CodecSet;

    /// A track was negotiated.
    fn on_format(&mut self, _kind: MediaKind, _codec: Codec) {}

    fn on_frame(&mut self, frame: ReceivedFrame<'_>);

    /// Whether a DTMF digit completes a known extension.
    fn extension_exists(&self, _digit: char) -> bool {
        false
    }
}

/// Outbound audio from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub payload: Vec<u8>,
    /// Samples covered by the payload.
    pub samples: u32,
}

/// Host input delivered to [`Client::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Audio(AudioFrame),
    Dtmf(char),
    Hangup,
}

/// One inbound RTP payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame<'a> {
    pub kind: MediaKind,
    pub codec: Codec,
    pub payload: &'a [u8],
    pub timestamp: u32,
    /// Timestamp delta from the previous packet of the same kind.
    pub samples: u32,
    /// Video marker bit. Always set for audio.
    pub end_of_frame: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Hangup,
    /// DTMF digit that matched an extension.
    Extension(char),
    /// The `Range` end was reached.
    PlaybackComplete,
    /// RTCP BYE from the camera.
    RemoteBye,
    /// Host event channel closed.
    HostGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub reason: EndReason,
    pub received_packets: u64,
    pub sent_audio_frames: u16,
}

/// Live view of a running session, readable from other tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub rtsp: RtspState,
    pub sip: Option<SipState>,
    pub received_packets: u64,
    pub sent_audio_frames: u16,
    pub send_errors: u32,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            rtsp: RtspState::Idle,
            sip: None,
            received_packets: 0,
            sent_audio_frames: 0,
            send_errors: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Rtsp,
    Sip,
}

/// What woke the loop.
#[derive(Debug)]
enum Readiness {
    Host(Option<HostEvent>),
    Control(Leg),
    Media(Leg, MediaKind, Channel),
    Tick,
}

/// Runs one RTSP session and, when configured, its SIP back-channel.
///
/// ```text
///            +-------------------+
///  host ---> |  HostEvent (mpsc) |--+
///            +-------------------+  |     +-------------+
///  RTSP TCP ------------------------+---> | select loop | ---> Host::on_frame
///  SIP UDP -------------------------+     +-------------+
///  RTP/RTCP pairs ------------------+
/// ```
///
/// Every wake-up is dispatched to the leg it belongs to, and the queued
/// [`LegEvent`]s are then applied. Teardown runs on every exit path.
pub struct Client {
    config: ClientConfig,
    rng: SharedRng,
    status: Arc<RwLock<ClientStatus>>,
}

impl Client {
    pub fn new(config: ClientConfig, rng: SharedRng) -> Self {
        Self {
            config,
            rng,
            status: Arc::new(RwLock::new(ClientStatus::default())),
        }
    }

    /// Client seeded from the thread-local generator.
    pub fn with_entropy(config: ClientConfig) -> Self {
        Self::new(config, Box::new(StdRng::from_rng(&mut rand::rng())))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn status(&self) -> Arc<RwLock<ClientStatus>> {
        self.status.clone()
    }

    /// Run the session until hangup, an extension match, the end of
    /// playback, a remote BYE or a fatal error. Sockets are released and
    /// the camera told before returning, whatever the outcome.
    pub async fn run<H: Host>(
        &mut self,
        host: &mut H,
        events: &mut mpsc::Receiver<HostEvent>,
    ) -> Result<Outcome> {
        tracing::info!(uri = %self.config.target, sip = self.config.sip.is_some(), "session starting");
        let mut legs = self.connect(host.capabilities()).await?;
        legs.rtsp.machine.start();

        let result = self.drive(&mut legs, host, events).await;
        legs.shutdown(self.config.bye_wait).await;
        self.publish(&legs);

        match result {
            Ok(reason) => {
                let (_, sent_audio_frames) = legs.audio_out.frame_counts();
                let outcome = Outcome {
                    reason,
                    received_packets: legs.received_packets,
                    sent_audio_frames,
                };
                tracing::info!(?outcome, "session ended");
                Ok(outcome)
            }
            Err(error) => {
                tracing::error!(%error, "session failed");
                Err(error)
            }
        }
    }

    async fn connect(&mut self, capabilities: CodecSet) -> Result<Legs> {
        let target = &self.config.target;
        let control = StreamControl::connect(&target.host_port()).await?;
        let peer_ip = control.peer_addr().ip();
        let local_ip = control.local_addr()?.ip();

        let audio = MediaPair::bind(local_ip).await?;
        let video = MediaPair::bind(local_ip).await?;
        let ports = MediaPorts {
            audio: audio.ports(),
            video: video.ports(),
        };

        let mut rtsp_config = RtspConfig::new(target.clone(), ports, capabilities);
        rtsp_config.ingest_audio = self.config.ingest_audio;
        rtsp_config.report_interval = self.config.report_interval;
        rtsp_config.user_agent = self.config.user_agent.clone();

        let now = Instant::now();
        let rtsp = Session::new(
            RtspClient::new(rtsp_config),
            ControlChannel::Stream(control),
            MediaSockets {
                audio: Some(audio),
                video: Some(video),
            },
            now,
        );

        let sip = match &self.config.sip {
            None => None,
            Some(settings) => {
                let peer = SocketAddr::new(peer_ip, settings.port);
                let local_port = settings.local_port.unwrap_or(settings.port);
                let control = DatagramControl::connect(local_port, peer).await?;
                let local = SocketAddr::new(local_ip, control.local_port()?);
                let audio = MediaPair::bind(local_ip).await?;
                let config = SipConfig {
                    peer,
                    local,
                    peer_user: target
                        .username()
                        .unwrap_or(&self.config.local_user)
                        .to_string(),
                    local_user: self.config.local_user.clone(),
                    credentials: target.credentials.clone(),
                    realm: settings.realm.clone(),
                    audio_rtp_port: audio.ports().rtp,
                    user_agent: self.config.user_agent.clone(),
                };
                let mut agent = SipAgent::new(config, Box::new(StdRng::from_rng(&mut self.rng)));
                agent.start();
                Some(Session::new(
                    agent,
                    ControlChannel::Datagram(control),
                    MediaSockets {
                        audio: Some(audio),
                        video: None,
                    },
                    now,
                ))
            }
        };

        Ok(Legs {
            rtsp,
            sip,
            peer_ip,
            audio_out: AudioSender::new(),
            formats: [None; 2],
            last_timestamp: [None; 2],
            deadline: None,
            received_packets: 0,
            buf: vec![0; MEDIA_DATAGRAM_MAX],
        })
    }

    async fn drive<H: Host>(
        &mut self,
        legs: &mut Legs,
        host: &mut H,
        events: &mut mpsc::Receiver<HostEvent>,
    ) -> Result<EndReason> {
        let capabilities = host.capabilities();
        let idle_wait = self.config.idle_wait;
        let mut last_activity = Instant::now();

        loop {
            let now = Instant::now();
            if legs.deadline.is_some_and(|deadline| deadline <= now) {
                return Ok(EndReason::PlaybackComplete);
            }
            legs.rtsp.fire_timer(now)?;
            legs.apply_events(host, &mut self.rng, capabilities).await?;
            self.publish(legs);

            let wait = legs.wait(now, idle_wait);
            let readiness = {
                let sip = legs.sip.as_ref();
                tokio::select! {
                    event = events.recv() => Readiness::Host(event),
                    result = legs.rtsp.control.readable() => {
                        result?;
                        Readiness::Control(Leg::Rtsp)
                    }
                    result = sip_control_readable(sip) => {
                        result?;
                        Readiness::Control(Leg::Sip)
                    }
                    (kind, channel) = legs.rtsp.media.readable() => {
                        Readiness::Media(Leg::Rtsp, kind, channel)
                    }
                    (kind, channel) = sip_media_readable(sip) => {
                        Readiness::Media(Leg::Sip, kind, channel)
                    }
                    () = tokio::time::sleep(wait) => Readiness::Tick,
                }
            };

            let now = Instant::now();
            match readiness {
                Readiness::Host(None) => return Ok(EndReason::HostGone),
                Readiness::Host(Some(event)) => {
                    if let Some(reason) = legs.on_host_event(event, host) {
                        return Ok(reason);
                    }
                }
                Readiness::Control(Leg::Rtsp) => {
                    if legs.rtsp.control.try_receive()? > 0 {
                        last_activity = now;
                    }
                    legs.rtsp.dispatch_inbound(now)?;
                }
                Readiness::Control(Leg::Sip) => {
                    if let Some(sip) = legs.sip.as_mut() {
                        let received = sip.control.try_receive();
                        if let Err(error) = received.and_then(|_| sip.dispatch_inbound(now)) {
                            tracing::warn!(%error, "SIP receive failed");
                        }
                    }
                }
                Readiness::Media(leg, kind, channel) => {
                    if let Some(reason) = legs.on_media(leg, kind, channel, host, &mut self.rng, now) {
                        return Ok(reason);
                    }
                }
                Readiness::Tick => {
                    if !legs.rtsp.machine.is_playing()
                        && now.duration_since(last_activity) >= idle_wait
                    {
                        tracing::warn!(state = ?legs.rtsp.machine.state(), "no answer from camera");
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    fn publish(&self, legs: &Legs) {
        let mut status = self.status.write();
        status.rtsp = legs.rtsp.machine.state();
        status.sip = legs.sip.as_ref().map(|sip| sip.machine.state());
        status.received_packets = legs.received_packets;
        status.sent_audio_frames = legs.audio_out.frame_counts().1;
        status.send_errors = legs.audio_out.send_errors();
    }
}

async fn sip_control_readable(sip: Option<&Session<SipAgent>>) -> Result<()> {
    match sip {
        Some(sip) => sip.control.readable().await,
        None => std::future::pending().await,
    }
}

async fn sip_media_readable(sip: Option<&Session<SipAgent>>) -> (MediaKind, Channel) {
    match sip {
        Some(sip) => sip.media.readable().await,
        None => std::future::pending().await,
    }
}

/// Sockets, state machines and media bookkeeping of one run.
struct Legs {
    rtsp: Session<RtspClient>,
    sip: Option<Session<SipAgent>>,
    peer_ip: IpAddr,
    audio_out: AudioSender,
    formats: [Option<Codec>; 2],
    last_timestamp: [Option<u32>; 2],
    deadline: Option<Instant>,
    received_packets: u64,
    buf: Vec<u8>,
}

impl Legs {
    /// Loop wait: the idle interval, shortened by the playback deadline
    /// and the report timer.
    fn wait(&self, now: Instant, idle_wait: Duration) -> Duration {
        [self.deadline, self.rtsp.machine.poll_timeout()]
            .into_iter()
            .flatten()
            .map(|at| at.saturating_duration_since(now))
            .fold(idle_wait, Duration::min)
    }

    /// Apply everything both state machines queued.
    async fn apply_events<H: Host>(
        &mut self,
        host: &mut H,
        rng: &mut SharedRng,
        capabilities: CodecSet,
    ) -> Result<()> {
        while let Some(event) = self.rtsp.machine.poll_event() {
            self.apply_rtsp(event, host, rng, capabilities).await?;
        }
        if let Err(error) = self.apply_sip(rng).await {
            tracing::warn!(%error, "SIP leg error, RTSP session continues");
        }
        Ok(())
    }

    /// Errors here concern the SIP leg only.
    async fn apply_sip(&mut self, rng: &mut SharedRng) -> Result<()> {
        if let Some(sip) = self.sip.as_mut() {
            while let Some(event) = sip.machine.poll_event() {
                match event {
                    LegEvent::Transmit(bytes) => sip.control.send(&bytes).await?,
                    LegEvent::MediaEnabled {
                        payload_type,
                        peer_port,
                    } => {
                        if let Some(pair) = sip.media.audio.as_ref() {
                            pair.connect(Channel::Rtp, SocketAddr::new(self.peer_ip, peer_port))
                                .await?;
                            self.audio_out.enable(payload_type, &mut **rng);
                        }
                    }
                    LegEvent::MediaDisabled => self.audio_out.disable(),
                    other => tracing::trace!(?other, "sip event ignored"),
                }
            }
        }
        Ok(())
    }

    async fn apply_rtsp<H: Host>(
        &mut self,
        event: LegEvent,
        host: &mut H,
        rng: &mut SharedRng,
        capabilities: CodecSet,
    ) -> Result<()> {
        let now = Instant::now();
        match event {
            LegEvent::Transmit(bytes) => self.rtsp.control.send(&bytes).await?,
            LegEvent::ConnectMedia {
                kind,
                channel,
                port,
            } => {
                if let Some(pair) = self.rtsp.media.get(kind) {
                    pair.connect(channel, SocketAddr::new(self.peer_ip, port))
                        .await?;
                }
            }
            LegEvent::OpenVideoPath => {
                if let Some(pair) = self.rtsp.media.video.as_ref() {
                    if let Err(error) = pair.try_send(Channel::Rtp, &start_packet()) {
                        tracing::warn!(%error, "video start packet not sent");
                    }
                }
                self.rtsp
                    .send_receiver_report(MediaKind::Video, rng.next_u32(), now);
            }
            LegEvent::FormatSelected { kind, codec, .. } => {
                host.on_format(kind, codec);
                self.formats[kind as usize] = Some(codec);
            }
            LegEvent::Playing { duration } => {
                self.rtsp.reset_stats(now);
                self.deadline = duration.map(|duration| now + duration);
                if let Some(sip) = self.sip.as_mut() {
                    let codec = choose_offer(self.formats[MediaKind::Audio as usize], capabilities);
                    if let Err(error) = sip.machine.invite(codec, false) {
                        tracing::warn!(%error, %codec, "INVITE not sent");
                    }
                }
            }
            LegEvent::ReportsDue => {
                for kind in [MediaKind::Audio, MediaKind::Video] {
                    if self.rtsp.machine.track(kind).is_some() {
                        self.rtsp.send_receiver_report(kind, rng.next_u32(), now);
                    }
                }
            }
            other => tracing::trace!(?other, "rtsp event ignored"),
        }
        Ok(())
    }

    fn on_host_event<H: Host>(&mut self, event: HostEvent, host: &H) -> Option<EndReason> {
        match event {
            HostEvent::Hangup => Some(EndReason::Hangup),
            HostEvent::Dtmf(digit) => {
                if host.extension_exists(digit) {
                    tracing::info!(%digit, "extension matched");
                    Some(EndReason::Extension(digit))
                } else {
                    tracing::debug!(%digit, "DTMF digit ignored");
                    None
                }
            }
            HostEvent::Audio(frame) => {
                let packet = self.audio_out.on_frame(&frame.payload, frame.samples)?;
                let pair = self.sip.as_ref().and_then(|sip| sip.media.audio.as_ref());
                if let Some(Err(error)) = pair.map(|pair| pair.try_send(Channel::Rtp, &packet)) {
                    self.audio_out.record_send_error();
                    tracing::warn!(%error, errors = self.audio_out.send_errors(), "audio frame not sent");
                }
                None
            }
        }
    }

    /// Drain one readable media socket.
    fn on_media<H: Host>(
        &mut self,
        leg: Leg,
        kind: MediaKind,
        channel: Channel,
        host: &mut H,
        rng: &mut SharedRng,
        now: Instant,
    ) -> Option<EndReason> {
        loop {
            let pair = match leg {
                Leg::Rtsp => self.rtsp.media.get(kind),
                Leg::Sip => self.sip.as_ref().and_then(|sip| sip.media.get(kind)),
            }?;
            let len = match pair.socket(channel).try_recv_from(&mut self.buf) {
                Ok((len, _)) => len,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(error) => {
                    tracing::warn!(?leg, ?kind, ?channel, %error, "media receive failed");
                    return None;
                }
            };
            let datagram = &self.buf[..len];

            match (leg, channel) {
                (Leg::Rtsp, Channel::Rtp) => {
                    self.received_packets += 1;
                    ingest_rtp(
                        &mut self.rtsp,
                        &mut self.last_timestamp,
                        &self.formats,
                        kind,
                        datagram,
                        host,
                    );
                }
                (Leg::Rtsp, Channel::Rtcp) => {
                    if contains_bye(datagram) {
                        tracing::info!(?kind, "RTCP BYE from camera");
                        return Some(EndReason::RemoteBye);
                    }
                    self.rtsp.send_receiver_report(kind, rng.next_u32(), now);
                }
                (Leg::Sip, Channel::Rtcp) => {
                    if contains_bye(datagram) {
                        tracing::info!("RTCP BYE on the SIP leg");
                        self.audio_out.disable();
                    }
                }
                (Leg::Sip, Channel::Rtp) => tracing::trace!(len, "inbound RTP on the SIP leg dropped"),
            }
        }
    }

    /// TEARDOWN, BYE and release. Errors are logged, never returned.
    async fn shutdown(&mut self, bye_wait: Duration) {
        self.rtsp.machine.teardown();
        flush_transmits(&mut self.rtsp).await;

        if let Some(sip) = self.sip.as_mut() {
            if sip.machine.hangup() {
                flush_transmits(sip).await;
                let answered = tokio::time::timeout(bye_wait, async {
                    while sip.machine.bye_pending() {
                        sip.control.readable().await?;
                        sip.control.try_receive()?;
                        sip.dispatch_inbound(Instant::now())?;
                        flush_transmits(sip).await;
                    }
                    Ok::<(), Error>(())
                })
                .await;
                match answered {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => tracing::warn!(%error, "BYE exchange failed"),
                    Err(_) => tracing::debug!(?bye_wait, "no answer to BYE"),
                }
            }
            sip.machine.finish();
        }
        self.audio_out.disable();
    }
}

fn ingest_rtp<H: Host>(
    session: &mut Session<RtspClient>,
    last_timestamp: &mut [Option<u32>; 2],
    formats: &[Option<Codec>; 2],
    kind: MediaKind,
    datagram: &[u8],
    host: &mut H,
) {
    let Some(packet) = RtpPacket::parse(datagram) else {
        tracing::trace!(?kind, len = datagram.len(), "not an RTP packet");
        return;
    };
    session
        .stats_mut(kind)
        .update(packet.timestamp, packet.sequence, packet.ssrc);

    let previous = last_timestamp[kind as usize].replace(packet.timestamp);
    let samples = match (previous, kind) {
        (Some(previous), _) => packet.timestamp.wrapping_sub(previous),
        (None, MediaKind::Audio) => FIRST_AUDIO_SAMPLES,
        (None, MediaKind::Video) => 0,
    };

    let Some(codec) = formats[kind as usize] else {
        return;
    };
    host.on_frame(ReceivedFrame {
        kind,
        codec,
        payload: packet.payload,
        timestamp: packet.timestamp,
        samples,
        end_of_frame: kind == MediaKind::Audio || packet.marker,
    });
}

/// Send queued control messages, dropping every other event.
async fn flush_transmits<P: ControlProtocol>(session: &mut Session<P>) {
    while let Some(event) = session.machine.poll_event() {
        match event {
            LegEvent::Transmit(bytes) => {
                if let Err(error) = session.control.send(&bytes).await {
                    tracing::warn!(leg = session.name(), %error, "send failed during teardown");
                }
            }
            other => tracing::trace!(leg = session.name(), ?other, "event dropped during teardown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let target = TargetUri::parse("rtsp://cam.local/stream").unwrap();
        let config = ClientConfig::new(target);
        assert!(config.sip.is_none());
        assert!(config.ingest_audio);
        assert_eq!(config.idle_wait, Duration::from_secs(4));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.bye_wait, Duration::from_millis(500));

        let sip = SipSettings::default();
        assert_eq!(sip.realm, "None");
        assert_eq!(sip.port, 5060);
        assert_eq!(sip.local_port, None);
    }

    #[test]
    fn status_starts_idle() {
        let target = TargetUri::parse("rtsp://cam.local/stream").unwrap();
        let client = Client::new(ClientConfig::new(target), Box::new(StdRng::seed_from_u64(1)));
        let status = client.status();
        let status = status.read();
        assert_eq!(status.rtsp, RtspState::Idle);
        assert_eq!(status.sip, None);
        assert_eq!(status.received_packets, 0);
    }
}
