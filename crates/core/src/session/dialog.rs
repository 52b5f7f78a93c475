//! SIP dialog correlators (RFC 3261 §12, §8.1.1.7).
//!
//! | Correlator | Format | Regenerated |
//! |------------|--------|-------------|
//! | local tag | `%08x` | fresh transaction outside a dialog |
//! | Call-ID | `4×%08x@<local ip>` | fresh transaction outside a dialog |
//! | branch | `z9hG4bKi-` + `4×%08x` | every request, except the ACK to a non-2xx |

use std::net::IpAddr;

use rand::RngCore;

/// RFC 3261 §8.1.1.7 branch prefix.
pub const BRANCH_MAGIC: &str = "z9hG4bK";

pub fn new_tag(rng: &mut dyn RngCore) -> String {
    format!("{:08x}", rng.next_u32())
}

pub fn new_branch(rng: &mut dyn RngCore) -> String {
    format!(
        "{BRANCH_MAGIC}i-{:08x}{:08x}{:08x}{:08x}",
        rng.next_u32(),
        rng.next_u32(),
        rng.next_u32(),
        rng.next_u32()
    )
}

pub fn new_call_id(rng: &mut dyn RngCore, host: IpAddr) -> String {
    format!(
        "{:08x}{:08x}{:08x}{:08x}@{host}",
        rng.next_u32(),
        rng.next_u32(),
        rng.next_u32(),
        rng.next_u32()
    )
}

/// SDP `o=` session id: `158` and eight random digits.
pub fn new_sdp_session_id(rng: &mut dyn RngCore) -> String {
    format!("158{:08}", rng.next_u32() % 100_000_000)
}

/// `tag` parameter of a `To`/`From` value. The value ends at a space,
/// `;`, `>` or end of line.
pub fn extract_tag(header: &str) -> Option<&str> {
    let start = header.find("tag=")? + 4;
    let rest = &header[start..];
    let end = rest
        .find(|c: char| matches!(c, ' ' | ';' | '>' | '\r' | '\n'))
        .unwrap_or(rest.len());
    let tag = &rest[..end];
    (!tag.is_empty()).then_some(tag)
}

/// `branch` parameter of a `Via` value.
pub fn extract_branch(via: &str) -> Option<&str> {
    via.split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("branch="))
        .filter(|branch| !branch.is_empty())
}

/// Correlation state of the single SIP dialog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dialog {
    pub local_tag: String,
    pub peer_tag: Option<String>,
    pub call_id: String,
    pub branch: String,
    established: bool,
}

impl Dialog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare correlators for a new request. Outside a dialog, a
    /// non-retry transaction gets a new local tag and Call-ID. The branch
    /// is always new.
    pub fn begin_transaction(&mut self, rng: &mut dyn RngCore, host: IpAddr, retry: bool) {
        if !self.established && (!retry || self.call_id.is_empty()) {
            self.local_tag = new_tag(rng);
            self.call_id = new_call_id(rng, host);
            self.peer_tag = None;
        }
        self.branch = new_branch(rng);
    }

    /// Take the peer tag from a response's `To` value. Ignored once the
    /// dialog is established.
    pub fn set_peer_tag(&mut self, to: Option<&str>) {
        if self.established {
            return;
        }
        match to.and_then(extract_tag) {
            Some(tag) => {
                tracing::debug!(tag, "peer tag recorded");
                self.peer_tag = Some(tag.to_string());
            }
            None => tracing::debug!(?to, "no tag in To header"),
        }
    }

    pub fn establish(&mut self) {
        self.established = true;
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn close(&mut self) {
        if self.established {
            tracing::info!(call_id = %self.call_id, "dialog closed");
        }
        self.established = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::net::Ipv4Addr;

    const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    #[test]
    fn correlator_shapes() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(new_tag(&mut rng).len(), 8);

        let branch = new_branch(&mut rng);
        assert!(branch.starts_with("z9hG4bKi-"));
        assert_eq!(branch.len(), 9 + 32);

        let call_id = new_call_id(&mut rng, HOST);
        assert!(call_id.ends_with("@192.168.1.20"));
        assert_eq!(call_id.find('@'), Some(32));

        let sid = new_sdp_session_id(&mut rng);
        assert!(sid.starts_with("158"));
        assert_eq!(sid.len(), 11);
        assert!(sid.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn tag_extraction() {
        assert_eq!(extract_tag("<sip:cam@10.0.0.2:5060>;tag=a1b2c3"), Some("a1b2c3"));
        assert_eq!(extract_tag("<sip:cam@10.0.0.2>;tag=xyz;foo=bar"), Some("xyz"));
        assert_eq!(extract_tag("<sip:cam@10.0.0.2>;tag=end \r\n"), Some("end"));
        assert_eq!(extract_tag("<sip:cam@10.0.0.2>"), None);
        assert_eq!(extract_tag("<sip:cam@10.0.0.2>;tag="), None);
    }

    #[test]
    fn branch_extraction() {
        let via = "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKabc;rport";
        assert_eq!(extract_branch(via), Some("z9hG4bKabc"));
        assert_eq!(extract_branch("SIP/2.0/UDP 10.0.0.5:5060"), None);
    }

    #[test]
    fn correlators_regenerate_outside_dialog_only() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut dialog = Dialog::new();

        dialog.begin_transaction(&mut rng, HOST, false);
        let (tag, call_id, branch) = (
            dialog.local_tag.clone(),
            dialog.call_id.clone(),
            dialog.branch.clone(),
        );

        dialog.begin_transaction(&mut rng, HOST, true);
        assert_eq!(dialog.local_tag, tag);
        assert_eq!(dialog.call_id, call_id);
        assert_ne!(dialog.branch, branch);

        dialog.begin_transaction(&mut rng, HOST, false);
        assert_ne!(dialog.local_tag, tag);
        assert_ne!(dialog.call_id, call_id);

        dialog.establish();
        let tag = dialog.local_tag.clone();
        dialog.begin_transaction(&mut rng, HOST, false);
        assert_eq!(dialog.local_tag, tag);
    }

    #[test]
    fn peer_tag_frozen_once_established() {
        let mut dialog = Dialog::new();
        dialog.set_peer_tag(Some("<sip:cam@h>;tag=first"));
        dialog.establish();
        dialog.set_peer_tag(Some("<sip:cam@h>;tag=second"));
        assert_eq!(dialog.peer_tag.as_deref(), Some("first"));

        dialog.close();
        assert!(!dialog.is_established());
    }
}
