use std::fmt;

use crate::auth::Credentials;
use crate::error::{Error, Result};

/// Default RTSP port (RFC 2326 §3.2).
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// `rtsp://[user[:pass]@]host[:port][/path]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUri {
    pub credentials: Option<Credentials>,
    /// Host name or address, IPv6 without brackets.
    pub host: String,
    pub port: u16,
    /// Always starts with `/`.
    pub path: String,
}

impl TargetUri {
    /// Parse a target URI.
    ///
    /// ```
    /// use rtsp_sip::uri::TargetUri;
    ///
    /// let uri = TargetUri::parse("rtsp://admin:secret@[fe80::1]:8554/live/ch1").unwrap();
    /// assert_eq!(uri.host, "fe80::1");
    /// assert_eq!(uri.port, 8554);
    /// assert_eq!(uri.base_url(), "rtsp://[fe80::1]:8554/live/ch1");
    /// assert_eq!(uri.credentials.unwrap().password, "secret");
    ///
    /// assert_eq!(TargetUri::parse("rtsp://10.0.0.2").unwrap().port, 554);
    /// assert!(TargetUri::parse("http://10.0.0.2/").is_err());
    /// ```
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidUri(format!("{why}: {uri}"));

        let (scheme, rest) = uri
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        if !scheme.eq_ignore_ascii_case("rtsp") {
            return Err(invalid("unsupported scheme"));
        }

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (credentials, host_port) = match authority.rsplit_once('@') {
            Some((userinfo, host_port)) => {
                let (user, pass) = userinfo.split_once(':').unwrap_or((userinfo, ""));
                (Some(Credentials::new(user, pass)), host_port)
            }
            None => (None, authority),
        };

        let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port),
                None if after.is_empty() => None,
                None => return Err(invalid("junk after IPv6 literal")),
            };
            (host, port)
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (host_port, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid("bad port"))?,
            None => DEFAULT_RTSP_PORT,
        };

        Ok(Self {
            credentials,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `host:port`, with brackets around IPv6 literals.
    pub fn host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Request URL for DESCRIBE, PLAY, OPTIONS and TEARDOWN.
    pub fn base_url(&self) -> String {
        format!("rtsp://{}{}", self.host_port(), self.path)
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username.as_str())
    }
}

impl fmt::Display for TargetUri {
    /// Credentials are never printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}
