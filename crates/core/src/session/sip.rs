//! Lite SIP user agent (RFC 3261 subset) pushing audio to the camera.
//!
//! ```text
//! UA                                       Camera
//!   |-- OPTIONS ----------------------------->|   answer only logged
//!   |-- INVITE (SDP offer, sendonly) -------->|   sent once RTSP is playing
//!   |<------------- 401 + WWW-Authenticate ---|
//!   |-- ACK (branch of the 401) ------------->|
//!   |-- INVITE + Authorization -------------->|   one retry
//!   |<--------------------- 200 + SDP --------|
//!   |-- ACK (fresh branch) ------------------>|
//!   |== RTP audio ===========================>|
//!   |-- BYE --------------------------------->|
//! ```
//!
//! Only PCMU and PCMA are offered. The answer must carry exactly one
//! audio format equal to the offer before media is enabled.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::dialog::{self, Dialog};
use super::{CSeqCounters, ControlProtocol, LegEvent, SharedRng};
use crate::auth::{self, BasicChallenge, Credentials, Dialect, DigestChallenge};
use crate::error::{AuthFailure, Error, Result};
use crate::media::{Codec, CodecSet};
use crate::protocol::sdp;
use crate::protocol::{Message, Method, Request, Response, USER_AGENT, Version};

/// Default SIP port (RFC 3261 §19.1.2).
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Realm used when none is configured.
pub const DEFAULT_REALM: &str = "None";

/// How long teardown waits for a BYE answer.
pub const DEFAULT_BYE_WAIT: Duration = Duration::from_millis(500);

const MAX_FORWARDS: u32 = 70;
const ALLOW: &str = "INVITE, ACK, CANCEL, OPTIONS, BYE, INFO";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipState {
    Idle,
    Options,
    Invite,
    InDialog,
    Failed,
    Bye,
}

/// Settings for one SIP leg.
#[derive(Debug, Clone)]
pub struct SipConfig {
    /// Camera SIP address.
    pub peer: SocketAddr,
    /// Local address of the connected SIP socket.
    pub local: SocketAddr,
    /// User part of the request URI, usually the RTSP user name.
    pub peer_user: String,
    pub local_user: String,
    pub credentials: Option<Credentials>,
    /// Digest realm the camera must present.
    pub realm: String,
    /// Local RTP port advertised in the offer.
    pub audio_rtp_port: u16,
    pub user_agent: String,
}

/// The SIP state machine.
pub struct SipAgent {
    config: SipConfig,
    rng: SharedRng,
    state: SipState,
    dialog: Dialog,
    cseq: CSeqCounters,
    authorization: Option<String>,
    sdp_session_id: String,
    offered: Option<Codec>,
    invite_retried: bool,
    bye_retried: bool,
    bye_answered: bool,
    events: VecDeque<LegEvent>,
}

impl SipAgent {
    pub fn new(config: SipConfig, mut rng: SharedRng) -> Self {
        let sdp_session_id = dialog::new_sdp_session_id(&mut *rng);
        Self {
            config,
            rng,
            state: SipState::Idle,
            dialog: Dialog::new(),
            cseq: CSeqCounters::new(),
            authorization: None,
            sdp_session_id,
            offered: None,
            invite_retried: false,
            bye_retried: false,
            bye_answered: false,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SipState {
        self.state
    }

    pub fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    /// Codec of the pending or accepted offer.
    pub fn offered_codec(&self) -> Option<Codec> {
        self.offered
    }

    /// `sip:<user>@<peer ip>:<peer port>`
    pub fn peer_uri(&self) -> String {
        format!("sip:{}@{}", self.config.peer_user, self.config.peer)
    }

    /// Probe the camera with OPTIONS.
    pub fn start(&mut self) {
        self.dialog
            .begin_transaction(&mut *self.rng, self.config.local.ip(), false);
        let cseq = self.cseq.next(&Method::Options);
        let branch = self.dialog.branch.clone();
        let request = self.request(Method::Options, cseq, &branch, false);
        self.send(request);
        self.set_state(SipState::Options);
    }

    /// Send an INVITE offering `codec` (PCMU or PCMA).
    pub fn invite(&mut self, codec: Codec, retry: bool) -> Result<()> {
        let offer = sdp::build_offer(
            &self.sdp_session_id,
            self.config.local.ip(),
            self.config.audio_rtp_port,
            codec,
        )
        .ok_or_else(|| Error::violation(format!("{codec} cannot be offered")))?;

        self.offered = Some(codec);
        self.dialog
            .begin_transaction(&mut *self.rng, self.config.local.ip(), retry);
        let cseq = self.cseq.next(&Method::Invite);
        let branch = self.dialog.branch.clone();
        let request = self
            .request(Method::Invite, cseq, &branch, false)
            .add_header("Allow", ALLOW)
            .with_body("application/sdp", offer);
        tracing::info!(%codec, retry, cseq, "sending INVITE");
        self.send(request);
        self.set_state(SipState::Invite);
        Ok(())
    }

    /// Send BYE if a dialog is established. Returns whether an answer
    /// should be waited for.
    pub fn hangup(&mut self) -> bool {
        if !self.dialog.is_established() {
            return false;
        }
        self.send_bye(false);
        true
    }

    /// Whether a BYE is still waiting for its final answer.
    pub fn bye_pending(&self) -> bool {
        self.state == SipState::Bye && !self.bye_answered
    }

    /// Forget the dialog regardless of how teardown went.
    pub fn finish(&mut self) {
        self.dialog.close();
        self.set_state(SipState::Idle);
    }

    fn set_state(&mut self, state: SipState) {
        if self.state != state {
            tracing::info!(from = ?self.state, to = ?state, "sip state transition");
            self.state = state;
        }
    }

    fn fail(&mut self, reason: &dyn std::fmt::Display) {
        tracing::warn!(%reason, "SIP attempt abandoned");
        self.set_state(SipState::Failed);
    }

    fn request(&self, method: Method, cseq: u32, branch: &str, peer_tag: bool) -> Request {
        let uri = self.peer_uri();
        let to = match (&self.dialog.peer_tag, peer_tag) {
            (Some(tag), true) => format!("<{uri}>;tag={tag}"),
            _ => format!("<{uri}>"),
        };
        let local = self.config.local;
        let user = &self.config.local_user;
        let cseq = format!("{cseq} {method}");
        Request::new(method, uri, Version::Sip20)
            .add_header("Via", format!("SIP/2.0/UDP {local};branch={branch};rport"))
            .add_header("Max-Forwards", MAX_FORWARDS)
            .add_header("To", to)
            .add_header(
                "From",
                format!("<sip:{user}@{}>;tag={}", local.ip(), self.dialog.local_tag),
            )
            .add_header("Call-ID", &self.dialog.call_id)
            .add_header("CSeq", cseq)
            .add_header("Contact", format!("<sip:{user}@{local}>"))
            .add_header("User-Agent", &self.config.user_agent)
            .add_optional_header("Authorization", self.authorization.as_deref())
    }

    fn send(&mut self, request: Request) {
        tracing::debug!(method = %request.method, uri = %request.uri, "sip request");
        self.events
            .push_back(LegEvent::Transmit(request.serialize().into_bytes()));
    }

    fn send_ack(&mut self, cseq: u32, branch: &str) {
        let request = self.request(Method::Ack, cseq, branch, true);
        self.send(request);
    }

    fn send_bye(&mut self, retry: bool) {
        self.dialog
            .begin_transaction(&mut *self.rng, self.config.local.ip(), true);
        let cseq = self.cseq.next(&Method::Bye);
        let branch = self.dialog.branch.clone();
        let request = self.request(Method::Bye, cseq, &branch, true);
        tracing::info!(retry, cseq, "sending BYE");
        self.send(request);
        self.bye_answered = false;
        self.set_state(SipState::Bye);
    }

    /// Digest `Authorization` for a 401. Basic is not offered on this leg.
    fn answer_challenge(&mut self, message: &Message, method: &Method) -> Result<()> {
        if BasicChallenge::find(&message.headers).is_ok() {
            return Err(Error::auth(AuthFailure::UnsupportedScheme("Basic".into())));
        }
        let challenge = DigestChallenge::find(&message.headers)?;
        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or(Error::auth(AuthFailure::MissingCredentials))?;
        let value = auth::digest_authorization(
            Dialect::Sip,
            credentials,
            &challenge,
            method.as_str(),
            &self.peer_uri(),
            Some(&self.config.realm),
        )?;
        self.authorization = Some(value);
        Ok(())
    }

    fn on_invite_response(&mut self, message: Message) -> Result<()> {
        let code = message.status_code().unwrap_or(0);
        let cseq = message
            .headers
            .cseq()
            .unwrap_or_else(|| self.cseq.last(&Method::Invite));

        match code {
            100..=199 => {
                tracing::debug!(code, "provisional INVITE response");
                Ok(())
            }
            200..=299 => {
                self.dialog.set_peer_tag(message.header("To"));
                self.dialog.establish();
                tracing::info!(call_id = %self.dialog.call_id, "dialog established");
                self.dialog
                    .begin_transaction(&mut *self.rng, self.config.local.ip(), true);
                let branch = self.dialog.branch.clone();
                self.send_ack(cseq, &branch);
                self.set_state(SipState::InDialog);
                self.accept_answer(&message);
                Ok(())
            }
            400..=499 => {
                self.dialog.set_peer_tag(message.header("To"));
                let branch = message
                    .header("Via")
                    .and_then(dialog::extract_branch)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.dialog.branch.clone());
                self.send_ack(cseq, &branch);

                if code != 401 {
                    self.fail(&format_args!("INVITE rejected with {code}"));
                    return Ok(());
                }
                if self.invite_retried {
                    self.fail(&AuthFailure::RetriesExhausted);
                    return Ok(());
                }
                if let Err(error) = self.answer_challenge(&message, &Method::Invite) {
                    self.fail(&error);
                    return Ok(());
                }
                self.invite_retried = true;
                let codec = self.offered.unwrap_or(Codec::Pcmu);
                self.invite(codec, true)
            }
            _ => {
                self.fail(&format_args!("INVITE answered with {code}"));
                Ok(())
            }
        }
    }

    /// Check the SDP answer and enable outbound audio when it matches the
    /// offer.
    fn accept_answer(&mut self, message: &Message) {
        if !message.has_content_type("application/sdp") {
            tracing::warn!(content_type = ?message.header("Content-Type"), "INVITE answer without SDP");
            return;
        }
        let answer = sdp::decode(&message.body_text(), true);
        let Some(audio) = answer.audio else {
            tracing::warn!("SDP answer has no audio");
            return;
        };

        let formats: Vec<_> = audio.bound_formats().collect();
        if formats.len() != 1 {
            tracing::warn!(count = formats.len(), "SDP answer must carry exactly one audio format");
            return;
        }
        let offered = self.offered;
        if formats[0].codec != offered {
            tracing::warn!(answered = ?formats[0].codec, ?offered, "SDP answer codec differs from offer");
            return;
        }
        let (Some(peer_port), Some(payload_type)) = (
            audio.peer_port,
            offered.and_then(Codec::static_payload_type),
        ) else {
            tracing::warn!("SDP answer without usable audio port");
            return;
        };

        tracing::info!(peer_port, payload_type, "outbound audio accepted");
        self.events.push_back(LegEvent::MediaEnabled {
            payload_type,
            peer_port,
        });
    }

    fn on_bye_response(&mut self, message: Message) -> Result<()> {
        let code = message.status_code().unwrap_or(0);
        if code == 401 && !self.bye_retried {
            self.bye_retried = true;
            match self.answer_challenge(&message, &Method::Bye) {
                Ok(()) => {
                    self.send_bye(true);
                    return Ok(());
                }
                Err(error) => tracing::warn!(%error, "BYE challenge not answered"),
            }
        }
        tracing::info!(code, "BYE answered");
        self.bye_answered = true;
        Ok(())
    }

    fn on_request(&mut self, method: &Method, message: &Message) {
        if !self.dialog.is_established() {
            tracing::warn!(%method, "request outside a dialog ignored");
            return;
        }
        match method {
            Method::Bye => {
                tracing::info!("peer ended the dialog");
                self.reply_ok(message);
                self.dialog.close();
                self.events.push_back(LegEvent::MediaDisabled);
                self.set_state(SipState::Idle);
            }
            Method::Info => self.reply_ok(message),
            // TODO: answer CANCEL with 200 and 487 for the pending INVITE.
            Method::Cancel => tracing::info!("CANCEL received, not answered"),
            other => tracing::warn!(method = %other, "unsupported SIP request"),
        }
    }

    /// 200 OK echoing the request's dialog headers.
    fn reply_ok(&mut self, request: &Message) {
        let via = request
            .header("Via")
            .map(|via| self.reply_via(via))
            .unwrap_or_default();
        let mut response = Response::ok(Version::Sip20).add_header("Via", &via);
        for name in ["To", "From", "Call-ID", "CSeq"] {
            if let Some(value) = request.header(name) {
                response = response.add_header(name, value);
            }
        }
        tracing::debug!(cseq = ?request.header("CSeq"), "replying 200 OK");
        self.events
            .push_back(LegEvent::Transmit(response.serialize().into_bytes()));
    }

    /// First `Via` segment, its branch, and where the request came from.
    fn reply_via(&self, via: &str) -> String {
        let sent_by = via.split(';').next().unwrap_or("").trim();
        let mut value = sent_by.to_string();
        if let Some(branch) = dialog::extract_branch(via) {
            value.push_str(&format!(";branch={branch}"));
        }
        value.push_str(&format!(
            ";rport={};received={}",
            self.config.peer.port(),
            self.config.peer.ip()
        ));
        value
    }
}

impl ControlProtocol for SipAgent {
    fn name(&self) -> &'static str {
        "sip"
    }

    fn handle_message(&mut self, message: Message, _now: Instant) -> Result<()> {
        if let Some(method) = message.method().cloned() {
            self.on_request(&method, &message);
            return Ok(());
        }

        let method = message
            .header("CSeq")
            .and_then(|cseq| cseq.split_whitespace().nth(1))
            .map(Method::parse);
        match (method, self.state) {
            (Some(Method::Invite), SipState::Invite) => self.on_invite_response(message),
            (Some(Method::Bye), SipState::Bye) => self.on_bye_response(message),
            (Some(Method::Options), _) => {
                tracing::info!(code = ?message.status_code(), "OPTIONS answered");
                Ok(())
            }
            (method, state) => {
                tracing::debug!(?method, ?state, code = ?message.status_code(), "stray SIP response");
                Ok(())
            }
        }
    }

    fn handle_timeout(&mut self, _now: Instant) -> Result<()> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<LegEvent> {
        self.events.pop_front()
    }

    fn poll_timeout(&self) -> Option<Instant> {
        None
    }
}

/// Codec to offer: the RTSP audio codec when it is PCMU or PCMA, else the
/// first of those the host supports, else PCMU.
pub fn choose_offer(rtsp_audio: Option<Codec>, host: CodecSet) -> Codec {
    match rtsp_audio {
        Some(codec @ (Codec::Pcmu | Codec::Pcma)) => codec,
        _ => [Codec::Pcmu, Codec::Pcma]
            .into_iter()
            .find(|codec| host.contains(*codec))
            .unwrap_or(Codec::Pcmu),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn agent() -> SipAgent {
        let config = SipConfig {
            peer: "10.0.0.2:5060".parse().unwrap(),
            local: "10.0.0.9:5060".parse().unwrap(),
            peer_user: "admin".into(),
            local_user: "rtspsip".into(),
            credentials: Some(Credentials::new("admin", "secret")),
            realm: "cam".into(),
            audio_rtp_port: 40004,
            user_agent: USER_AGENT.into(),
        };
        SipAgent::new(config, Box::new(StdRng::seed_from_u64(42)))
    }

    fn drain(agent: &mut SipAgent) -> Vec<LegEvent> {
        std::iter::from_fn(|| agent.poll_event()).collect()
    }

    fn sent(events: &[LegEvent]) -> Vec<Message> {
        events
            .iter()
            .filter_map(|e| match e {
                LegEvent::Transmit(bytes) => Some(Message::parse(bytes).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn answer(code: u16, cseq: &str, extra: &[(&str, &str)], body: &str) -> Message {
        let mut raw = format!(
            "SIP/2.0 {code} Reason\r\n\
             Via: SIP/2.0/UDP 10.0.0.9:5060;branch=z9hG4bKresp;rport=5060\r\n\
             To: <sip:admin@10.0.0.2:5060>;tag=peer1\r\n\
             CSeq: {cseq}\r\n"
        );
        for (name, value) in extra {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
        Message::parse(raw.as_bytes()).unwrap()
    }

    fn sdp_answer(formats: &str, rtpmaps: &[&str]) -> String {
        let mut sdp = format!("v=0\r\nc=IN IP4 10.0.0.2\r\nm=audio 7078 RTP/AVP {formats}\r\n");
        for map in rtpmaps {
            sdp.push_str(&format!("a=rtpmap:{map}\r\n"));
        }
        sdp
    }

    fn inviting() -> (SipAgent, Message) {
        let mut agent = agent();
        agent.start();
        agent.invite(Codec::Pcmu, false).unwrap();
        let invite = sent(&drain(&mut agent)).pop().unwrap();
        (agent, invite)
    }

    #[test]
    fn options_then_invite_templates() {
        let mut agent = agent();
        agent.start();
        let options = sent(&drain(&mut agent)).remove(0);
        assert_eq!(options.header("CSeq"), Some("1 OPTIONS"));
        assert_eq!(options.header("Max-Forwards"), Some("70"));
        assert!(options.header("Via").unwrap().starts_with("SIP/2.0/UDP 10.0.0.9:5060;branch=z9hG4bKi-"));
        assert!(options.header("Via").unwrap().ends_with(";rport"));
        assert_eq!(agent.state(), SipState::Options);

        agent.invite(Codec::Pcma, false).unwrap();
        let invite = sent(&drain(&mut agent)).remove(0);
        assert!(matches!(
            &invite.start_line,
            crate::protocol::StartLine::Request { uri, .. } if uri == "sip:admin@10.0.0.2:5060"
        ));
        assert_eq!(invite.header("CSeq"), Some("1 INVITE"));
        assert_eq!(invite.header("Allow"), Some(ALLOW));
        assert_eq!(invite.header("To"), Some("<sip:admin@10.0.0.2:5060>"));
        assert!(invite.header("From").unwrap().starts_with("<sip:rtspsip@10.0.0.9>;tag="));
        assert!(invite.header("Call-ID").unwrap().ends_with("@10.0.0.9"));
        let offer = invite.body_text();
        assert!(offer.contains("m=audio 40004 RTP/AVP 8\r\n"));
        assert!(offer.contains("a=rtpmap:8 PCMA/8000\r\n"));
        assert!(offer.contains("a=sendonly\r\n"));
    }

    #[test]
    fn single_matching_format_enables_media() {
        let (mut agent, invite) = inviting();
        let body = sdp_answer("0", &["0 PCMU/8000"]);
        let ok = answer(200, "1 INVITE", &[("Content-Type", "application/sdp")], &body);
        agent.handle_message(ok, Instant::now()).unwrap();

        let events = drain(&mut agent);
        assert!(events.contains(&LegEvent::MediaEnabled {
            payload_type: 0,
            peer_port: 7078,
        }));
        assert!(agent.dialog().is_established());
        assert_eq!(agent.state(), SipState::InDialog);

        let ack = sent(&events).remove(0);
        assert_eq!(ack.method(), Some(&Method::Ack));
        assert_eq!(ack.header("CSeq"), Some("1 ACK"));
        assert_eq!(ack.header("To"), Some("<sip:admin@10.0.0.2:5060>;tag=peer1"));
        let ack_branch = dialog::extract_branch(ack.header("Via").unwrap()).unwrap();
        let invite_branch = dialog::extract_branch(invite.header("Via").unwrap()).unwrap();
        assert_ne!(ack_branch, invite_branch);
        assert_ne!(ack_branch, "z9hG4bKresp");
        assert_eq!(ack.header("Call-ID"), invite.header("Call-ID"));
    }

    #[test]
    fn two_formats_do_not_enable_media() {
        let (mut agent, _) = inviting();
        let body = sdp_answer("0 8", &["0 PCMU/8000", "8 PCMA/8000"]);
        let ok = answer(200, "1 INVITE", &[("Content-Type", "application/sdp")], &body);
        agent.handle_message(ok, Instant::now()).unwrap();

        let events = drain(&mut agent);
        assert!(!events.iter().any(|e| matches!(e, LegEvent::MediaEnabled { .. })));
        assert_eq!(sent(&events).len(), 1);
        assert!(agent.dialog().is_established());
    }

    #[test]
    fn mismatched_codec_does_not_enable_media() {
        let (mut agent, _) = inviting();
        let body = sdp_answer("8", &["8 PCMA/8000"]);
        let ok = answer(200, "1 INVITE", &[("Content-Type", "application/sdp")], &body);
        agent.handle_message(ok, Instant::now()).unwrap();
        assert!(!drain(&mut agent).iter().any(|e| matches!(e, LegEvent::MediaEnabled { .. })));
    }

    #[test]
    fn digest_challenge_acked_and_retried_once() {
        let (mut agent, invite) = inviting();
        let challenge = [("WWW-Authenticate", "Digest realm=\"cam\", nonce=\"n1\"")];
        agent
            .handle_message(answer(401, "1 INVITE", &challenge, ""), Instant::now())
            .unwrap();

        let out = sent(&drain(&mut agent));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].method(), Some(&Method::Ack));
        assert_eq!(
            dialog::extract_branch(out[0].header("Via").unwrap()),
            Some("z9hG4bKresp")
        );
        assert_eq!(out[0].header("CSeq"), Some("1 ACK"));

        let retry = &out[1];
        assert_eq!(retry.header("CSeq"), Some("2 INVITE"));
        assert_eq!(retry.header("Call-ID"), invite.header("Call-ID"));
        assert_eq!(retry.header("From"), invite.header("From"));
        assert_ne!(retry.header("Via"), invite.header("Via"));
        let authorization = retry.header("Authorization").unwrap();
        assert!(authorization.starts_with("Digest username=\"admin\", realm=\"cam\", nonce=\"n1\""));
        assert!(authorization.contains("uri=\"sip:admin@10.0.0.2:5060\""));

        agent
            .handle_message(answer(401, "2 INVITE", &challenge, ""), Instant::now())
            .unwrap();
        let out = sent(&drain(&mut agent));
        assert_eq!(out.len(), 1);
        assert_eq!(agent.state(), SipState::Failed);
    }

    #[test]
    fn realm_mismatch_abandons_invite() {
        let (mut agent, _) = inviting();
        let challenge = [("WWW-Authenticate", "Digest realm=\"other\", nonce=\"n1\"")];
        agent
            .handle_message(answer(401, "1 INVITE", &challenge, ""), Instant::now())
            .unwrap();
        assert_eq!(sent(&drain(&mut agent)).len(), 1);
        assert_eq!(agent.state(), SipState::Failed);
    }

    #[test]
    fn basic_challenge_is_unsupported() {
        let (mut agent, _) = inviting();
        let challenge = [("WWW-Authenticate", "Basic realm=\"cam\"")];
        agent
            .handle_message(answer(401, "1 INVITE", &challenge, ""), Instant::now())
            .unwrap();
        assert_eq!(agent.state(), SipState::Failed);
    }

    #[test]
    fn server_error_abandons_without_ack() {
        let (mut agent, _) = inviting();
        agent
            .handle_message(answer(503, "1 INVITE", &[], ""), Instant::now())
            .unwrap();
        assert!(sent(&drain(&mut agent)).is_empty());
        assert_eq!(agent.state(), SipState::Failed);
    }

    #[test]
    fn client_error_is_acked_on_response_branch_then_abandoned() {
        for code in [400, 420] {
            let (mut agent, invite) = inviting();
            agent
                .handle_message(answer(code, "1 INVITE", &[], ""), Instant::now())
                .unwrap();

            let out = sent(&drain(&mut agent));
            assert_eq!(out.len(), 1, "{code} must only be acked");
            assert_eq!(out[0].method(), Some(&Method::Ack));
            assert_eq!(out[0].header("CSeq"), Some("1 ACK"));
            assert_eq!(
                dialog::extract_branch(out[0].header("Via").unwrap()),
                Some("z9hG4bKresp")
            );
            assert_eq!(out[0].header("To"), Some("<sip:admin@10.0.0.2:5060>;tag=peer1"));
            assert_eq!(out[0].header("Call-ID"), invite.header("Call-ID"));
            assert_eq!(agent.state(), SipState::Failed);
            assert!(!agent.dialog().is_established());
        }
    }

    fn established() -> SipAgent {
        let (mut agent, _) = inviting();
        let body = sdp_answer("0", &["0 PCMU/8000"]);
        let ok = answer(200, "1 INVITE", &[("Content-Type", "application/sdp")], &body);
        agent.handle_message(ok, Instant::now()).unwrap();
        drain(&mut agent);
        agent
    }

    #[test]
    fn peer_bye_is_answered_and_closes_dialog() {
        let mut agent = established();
        let bye = Message::parse(
            b"BYE sip:rtspsip@10.0.0.9:5060 SIP/2.0\r\n\
              Via: SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKpeer;rport\r\n\
              To: <sip:rtspsip@10.0.0.9>;tag=local\r\n\
              From: <sip:admin@10.0.0.2:5060>;tag=peer1\r\n\
              Call-ID: abc@10.0.0.9\r\n\
              CSeq: 7 BYE\r\n\
              Content-Length: 0\r\n\r\n",
        )
        .unwrap();
        agent.handle_message(bye, Instant::now()).unwrap();

        let events = drain(&mut agent);
        assert!(events.contains(&LegEvent::MediaDisabled));
        let reply = sent(&events).remove(0);
        assert_eq!(reply.status_code(), Some(200));
        assert_eq!(
            reply.header("Via"),
            Some("SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKpeer;rport=5060;received=10.0.0.2")
        );
        assert_eq!(reply.header("CSeq"), Some("7 BYE"));
        assert_eq!(reply.header("Call-ID"), Some("abc@10.0.0.9"));
        assert_eq!(reply.header("Content-Length"), Some("0"));
        assert!(!agent.dialog().is_established());
        assert!(!agent.hangup());
    }

    #[test]
    fn info_in_dialog_is_answered() {
        let mut agent = established();
        let info = Message::parse(
            b"INFO sip:rtspsip@10.0.0.9:5060 SIP/2.0\r\n\
              Via: SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKinfo\r\n\
              To: <sip:rtspsip@10.0.0.9>;tag=local\r\n\
              From: <sip:admin@10.0.0.2:5060>;tag=peer1\r\n\
              Call-ID: abc@10.0.0.9\r\n\
              CSeq: 8 INFO\r\n\
              Content-Type: application/dtmf-relay\r\n\
              Content-Length: 10\r\n\r\n\
              Signal=5\r\n",
        )
        .unwrap();
        agent.handle_message(info, Instant::now()).unwrap();

        let events = drain(&mut agent);
        assert!(!events.contains(&LegEvent::MediaDisabled));
        let replies = sent(&events);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].status_code(), Some(200));
        assert_eq!(replies[0].header("CSeq"), Some("8 INFO"));
        assert_eq!(replies[0].header("Call-ID"), Some("abc@10.0.0.9"));
        assert!(agent.dialog().is_established());
        assert_eq!(agent.state(), SipState::InDialog);
    }

    #[test]
    fn cancel_and_unknown_requests_get_no_reply() {
        let mut agent = established();
        for method in ["CANCEL", "MESSAGE"] {
            let raw = format!(
                "{method} sip:rtspsip@10.0.0.9 SIP/2.0\r\nCSeq: 2 {method}\r\nContent-Length: 0\r\n\r\n"
            );
            agent
                .handle_message(Message::parse(raw.as_bytes()).unwrap(), Instant::now())
                .unwrap();
            assert!(drain(&mut agent).is_empty());
        }
        assert!(agent.dialog().is_established());
    }

    #[test]
    fn hangup_retries_bye_on_challenge() {
        let mut agent = established();
        assert!(agent.hangup());
        let bye = sent(&drain(&mut agent)).remove(0);
        assert_eq!(bye.header("CSeq"), Some("1 BYE"));
        assert_eq!(bye.header("To"), Some("<sip:admin@10.0.0.2:5060>;tag=peer1"));
        assert!(agent.bye_pending());

        let challenge = [("WWW-Authenticate", "Digest realm=\"cam\", nonce=\"n2\"")];
        agent
            .handle_message(answer(401, "1 BYE", &challenge, ""), Instant::now())
            .unwrap();
        let retry = sent(&drain(&mut agent)).remove(0);
        assert_eq!(retry.header("CSeq"), Some("2 BYE"));
        assert!(retry.header("Authorization").unwrap().contains("nonce=\"n2\""));
        assert!(agent.bye_pending());

        agent
            .handle_message(answer(401, "2 BYE", &challenge, ""), Instant::now())
            .unwrap();
        assert!(sent(&drain(&mut agent)).is_empty());
        assert!(!agent.bye_pending());

        agent.finish();
        assert_eq!(agent.state(), SipState::Idle);
        assert!(!agent.dialog().is_established());
    }

    #[test]
    fn offer_choice() {
        let host: CodecSet = [Codec::Pcma].into_iter().collect();
        assert_eq!(choose_offer(Some(Codec::Pcmu), host), Codec::Pcmu);
        assert_eq!(choose_offer(Some(Codec::G722), host), Codec::Pcma);
        assert_eq!(choose_offer(None, CodecSet::empty()), Codec::Pcmu);
    }
}
