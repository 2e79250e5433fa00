//! Peer-proxy handshake state machine: HTTP CONNECT, SOCKS4, and SOCKS5 (with and without
//! username/password auth), as a small bit-exact transition table per connection.

use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks4,
    Socks5,
}

#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Required for SOCKS4/5; HTTP CONNECT only needs `host`/`port` as strings.
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Begin,
    Connect,
    Init,
    Auth,
    Established,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProxyError {
    HttpConnectRejected,
    Socks4Rejected,
    Socks5UnsupportedMethod,
    Socks5AuthFailed,
    Socks5ConnectRejected,
    Socks5UnsupportedAddressType,
    NoIpAddressForSocksTarget,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadResult {
    /// Enough bytes arrived to make progress; `write` is what to send next, if anything;
    /// `established` signals the socket can be handed to the peer protocol.
    ReadyNow { write: Option<Vec<u8>>, established: bool },
    /// Not enough bytes yet; call `on_read` again once more arrive.
    Later,
}

/// Drives one outbound peer connection's proxy negotiation.
pub struct ProxyHandshake {
    kind: ProxyKind,
    auth: Option<ProxyAuth>,
    target: Target,
    state: State,
    inbuf: Vec<u8>,
}

impl ProxyHandshake {
    pub fn new(kind: ProxyKind, target: Target, auth: Option<ProxyAuth>) -> Self {
        Self {
            kind,
            auth,
            target,
            state: State::Begin,
            inbuf: Vec::new(),
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    /// Bytes to send immediately on connecting to the proxy, and the state this transitions to.
    pub fn initial_send(&mut self) -> Vec<u8> {
        match self.kind {
            ProxyKind::Http => {
                self.state = State::Connect;
                self.build_http_connect()
            }
            ProxyKind::Socks4 => {
                self.state = State::Connect;
                self.build_socks4_request()
            }
            ProxyKind::Socks5 => {
                self.state = State::Init;
                self.build_socks5_greeting()
            }
        }
    }

    /// Appends newly-read bytes and attempts to make progress in the current state.
    pub fn on_read(&mut self, data: &[u8]) -> Result<ReadResult, ProxyError> {
        self.inbuf.extend_from_slice(data);
        match self.state {
            State::Begin => Ok(ReadResult::Later),
            State::Connect if self.kind == ProxyKind::Http => self.step_http_connect(),
            State::Connect if self.kind == ProxyKind::Socks4 => self.step_socks4_connect(),
            State::Connect => self.step_socks5_connect(),
            State::Init => self.step_socks5_init(),
            State::Auth => self.step_socks5_auth(),
            State::Established => Ok(ReadResult::ReadyNow {
                write: None,
                established: true,
            }),
        }
    }

    fn build_http_connect(&self) -> Vec<u8> {
        let mut req = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n",
            host = self.target.host,
            port = self.target.port
        );
        if let Some(auth) = &self.auth {
            use base64::Engine;
            let creds = format!("{}:{}", auth.username, auth.password);
            let encoded = base64::engine::general_purpose::STANDARD.encode(creds.as_bytes());
            req.push_str(&format!("Proxy-Authorization: Basic {}\r\n", encoded));
        }
        req.push_str("\r\n");
        req.into_bytes()
    }

    fn step_http_connect(&mut self) -> Result<ReadResult, ProxyError> {
        let terminator = b"\r\n\r\n";
        let Some(end) = find_subslice(&self.inbuf, terminator) else {
            return Ok(ReadResult::Later);
        };
        let header = self.inbuf[..end].to_vec();
        let status_line_ok = header
            .split(|&b| b == b'\n')
            .next()
            .map(|line| contains_subslice(line, b" 200 "))
            .unwrap_or(false);
        self.inbuf.drain(..end + terminator.len());
        if !status_line_ok {
            return Err(ProxyError::HttpConnectRejected);
        }
        self.state = State::Established;
        Ok(ReadResult::ReadyNow {
            write: None,
            established: true,
        })
    }

    fn build_socks4_request(&self) -> Vec<u8> {
        let mut req = Vec::with_capacity(9);
        req.push(0x04);
        req.push(0x01);
        req.extend_from_slice(&self.target.port.to_be_bytes());
        match self.target.ip {
            Some(IpAddr::V4(v4)) => req.extend_from_slice(&v4.octets()),
            _ => req.extend_from_slice(&[0, 0, 0, 0]),
        }
        if let Some(auth) = &self.auth {
            req.extend_from_slice(auth.username.as_bytes());
        }
        req.push(0x00);
        req
    }

    fn step_socks4_connect(&mut self) -> Result<ReadResult, ProxyError> {
        if self.inbuf.len() < 8 {
            return Ok(ReadResult::Later);
        }
        let ok = self.inbuf[1] == 0x5A;
        self.inbuf.drain(..8);
        if !ok {
            return Err(ProxyError::Socks4Rejected);
        }
        self.state = State::Established;
        Ok(ReadResult::ReadyNow {
            write: None,
            established: true,
        })
    }

    fn build_socks5_greeting(&self) -> Vec<u8> {
        if self.auth.is_some() {
            vec![0x05, 0x02, 0x00, 0x02]
        } else {
            vec![0x05, 0x01, 0x00]
        }
    }

    fn step_socks5_init(&mut self) -> Result<ReadResult, ProxyError> {
        if self.inbuf.len() < 2 {
            return Ok(ReadResult::Later);
        }
        let method = self.inbuf[1];
        self.inbuf.drain(..2);
        match method {
            0x00 => {
                self.state = State::Connect;
                let write = self.build_socks5_connect()?;
                Ok(ReadResult::ReadyNow {
                    write: Some(write),
                    established: false,
                })
            }
            0x02 if self.auth.is_some() => {
                self.state = State::Auth;
                Ok(ReadResult::ReadyNow {
                    write: Some(self.build_socks5_auth()),
                    established: false,
                })
            }
            _ => Err(ProxyError::Socks5UnsupportedMethod),
        }
    }

    fn build_socks5_auth(&self) -> Vec<u8> {
        let auth = self.auth.as_ref().expect("auth method chosen without credentials");
        let mut req = vec![0x01, auth.username.len() as u8];
        req.extend_from_slice(auth.username.as_bytes());
        req.push(auth.password.len() as u8);
        req.extend_from_slice(auth.password.as_bytes());
        req
    }

    fn step_socks5_auth(&mut self) -> Result<ReadResult, ProxyError> {
        if self.inbuf.len() < 2 {
            return Ok(ReadResult::Later);
        }
        let ok = self.inbuf[1] == 0x00;
        self.inbuf.drain(..2);
        if !ok {
            return Err(ProxyError::Socks5AuthFailed);
        }
        self.state = State::Connect;
        let write = self.build_socks5_connect()?;
        Ok(ReadResult::ReadyNow {
            write: Some(write),
            established: false,
        })
    }

    fn build_socks5_connect(&self) -> Result<Vec<u8>, ProxyError> {
        let ip = self.target.ip.ok_or(ProxyError::NoIpAddressForSocksTarget)?;
        let mut req = vec![0x05, 0x01, 0x00];
        match ip {
            IpAddr::V4(v4) => {
                req.push(0x01);
                req.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                req.push(0x04);
                req.extend_from_slice(&v6.octets());
            }
        }
        req.extend_from_slice(&self.target.port.to_be_bytes());
        Ok(req)
    }

    fn step_socks5_connect(&mut self) -> Result<ReadResult, ProxyError> {
        if self.inbuf.len() < 4 {
            return Ok(ReadResult::Later);
        }
        if self.inbuf[1] != 0x00 {
            self.inbuf.clear();
            return Err(ProxyError::Socks5ConnectRejected);
        }
        let atyp = self.inbuf[3];
        let addr_len = match atyp {
            0x01 => 4,
            0x04 => 16,
            _ => return Err(ProxyError::Socks5UnsupportedAddressType),
        };
        let needed = 4 + addr_len + 2;
        if self.inbuf.len() < needed {
            return Ok(ReadResult::Later);
        }
        self.inbuf.drain(..needed);
        self.state = State::Established;
        Ok(ReadResult::ReadyNow {
            write: None,
            established: true,
        })
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    find_subslice(haystack, needle).is_some()
}
