//! Wire protocol for the burrow tunnel.
//!
//! This crate defines the protocol constants and zero-copy codecs shared by
//! the server and its tests: the startup preamble, the RSA-signed key
//! exchange hello, the login exchange, and the post-handshake mux frames.
//! All multi-byte integers are big-endian.

use std::net::IpAddr;

/// Leading byte of every preamble and mux frame.
pub const PROTO_MAGIC: u8 = 0xB7;
/// Protocol version reported in the login response.
pub const PROTO_VERSION: u16 = 0x0001;

pub const B_TRUE: u8 = 0x01;
pub const B_FALSE: u8 = 0x00;

/// Resume reply: session accepted, switch to the session cipher.
pub const REUSE_SUCCESS: u8 = 0x00;
/// Resume reply flag: server falls through to a fresh cipher exchange.
pub const REUSE_FAIL_START_CIPHER_EXCHANGE: u8 = 0x01;
/// Resume reply flag: the presented HMAC did not verify.
pub const REUSE_FAIL_HMAC_FAIL: u8 = 0x02;

pub const PACKET_PROXY: u8 = 0x01;
pub const PACKET_NEW_CONN: u8 = 0x02;
pub const PACKET_CLOSE_CONN: u8 = 0x03;

/// Address kind in `PACKET_NEW_CONN`: raw 4- or 16-byte IP.
pub const PROTO_ADDR_IP: u8 = 0x01;
/// Address kind in `PACKET_NEW_CONN`: host string to resolve.
pub const PROTO_ADDR_DOMAIN: u8 = 0x02;

/// Session identifiers are always 16 random bytes.
pub const SESSION_ID_LEN: usize = 16;
/// Resume HMAC is HMAC-SHA256.
pub const RESUME_HMAC_LEN: usize = 32;
/// Upper bound on the client nonce in a resume preamble.
pub const MAX_RESUME_RAND_LEN: usize = 64;
/// Username and password length bounds (inclusive).
pub const MAX_CRED_LEN: usize = 32;

/// Total mux frame size cap, header included.
pub const MAX_FRAME: usize = 65535;
/// `[magic, kind, len_hi, len_lo]`.
pub const FRAME_HEADER_LEN: usize = 4;
/// Largest payload that fits under [`MAX_FRAME`].
pub const MAX_FRAME_PAYLOAD: usize = MAX_FRAME - FRAME_HEADER_LEN;
/// Largest proxy data chunk (payload minus the conn_id prefix).
pub const MAX_PROXY_CHUNK: usize = MAX_FRAME_PAYLOAD - 4;

/// Exact reason strings surfaced in login failure responses.
pub const MSG_BAD_CREDENTIALS: &str = "invalid username/password";
pub const MSG_BAD_CRED_SIZE: &str = "user/passwd size invalid";

/// Protocol violations detected while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    #[error("bad magic: {0:#04x}")]
    BadMagic(u8),
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("{0} out of range")]
    LengthOutOfRange(&'static str),
    #[error("invalid address encoding")]
    InvalidAddress,
}

// ============================================================================
// Byte helpers
// ============================================================================

#[inline]
pub fn read_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

#[inline]
pub fn write_u16(buf: &mut [u8], v: u16) {
    buf[..2].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

#[inline]
pub fn write_u32(buf: &mut [u8], v: u32) {
    buf[..4].copy_from_slice(&v.to_be_bytes());
}

// ============================================================================
// Startup preamble
// ============================================================================

/// First four bytes on a fresh connection, after the global cipher unwrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preamble {
    /// `[MAGIC, 0, _, _]` — run the full key exchange.
    NewSession,
    /// `[MAGIC, id_len, rand_len, hmac_len]` — resume attempt; the body of
    /// `id_len + rand_len + hmac_len` bytes follows.
    Resume {
        id_len: usize,
        rand_len: usize,
        hmac_len: usize,
    },
}

impl Preamble {
    pub fn parse(header: [u8; 4]) -> Result<Self, ProtoError> {
        if header[0] != PROTO_MAGIC {
            return Err(ProtoError::BadMagic(header[0]));
        }
        if header[1] == 0 {
            return Ok(Preamble::NewSession);
        }
        let (id_len, rand_len, hmac_len) =
            (header[1] as usize, header[2] as usize, header[3] as usize);
        if id_len != SESSION_ID_LEN {
            return Err(ProtoError::LengthOutOfRange("session id length"));
        }
        if rand_len == 0 || rand_len > MAX_RESUME_RAND_LEN {
            return Err(ProtoError::LengthOutOfRange("resume nonce length"));
        }
        if hmac_len != RESUME_HMAC_LEN {
            return Err(ProtoError::LengthOutOfRange("resume hmac length"));
        }
        Ok(Preamble::Resume {
            id_len,
            rand_len,
            hmac_len,
        })
    }
}

/// Client-side: preamble requesting a fresh session.
pub fn write_new_session_preamble() -> [u8; 4] {
    [PROTO_MAGIC, 0, 0, 0]
}

/// Client-side: resume preamble plus body.
pub fn write_resume_preamble(id: &[u8], rand: &[u8], hmac: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + id.len() + rand.len() + hmac.len());
    out.extend_from_slice(&[
        PROTO_MAGIC,
        id.len() as u8,
        rand.len() as u8,
        hmac.len() as u8,
    ]);
    out.extend_from_slice(id);
    out.extend_from_slice(rand);
    out.extend_from_slice(hmac);
    out
}

// ============================================================================
// Server hello
// ============================================================================

/// Server hello body: signed DH parameters plus the offered cipher methods.
///
/// On the wire: a 10-byte header of five big-endian u16 lengths
/// (`pub_der`, `prime`, `public`, `signature`, `methods`), then
/// `pub_der || prime || generator || public || signature || methods`.
/// The signature covers `prime || generator || public`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello<'a> {
    /// SubjectPublicKeyInfo DER of the server's RSA key.
    pub pub_der: &'a [u8],
    /// DH prime P, big-endian, no leading zeros.
    pub prime: &'a [u8],
    /// DH generator G.
    pub generator: u8,
    /// Server public value f, big-endian.
    pub public: &'a [u8],
    /// RSA PKCS#1 v1.5 signature over SHA-256 of the signed range.
    pub signature: &'a [u8],
    /// Comma-joined method names, server preference order.
    pub methods: &'a [u8],
}

pub const HELLO_HEADER_LEN: usize = 10;

/// Parsed length header of a server hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloHeader {
    pub pub_der_len: usize,
    pub prime_len: usize,
    pub public_len: usize,
    pub signature_len: usize,
    pub methods_len: usize,
}

impl HelloHeader {
    pub fn parse(header: [u8; HELLO_HEADER_LEN]) -> Self {
        Self {
            pub_der_len: read_u16(&header[0..]) as usize,
            prime_len: read_u16(&header[2..]) as usize,
            public_len: read_u16(&header[4..]) as usize,
            signature_len: read_u16(&header[6..]) as usize,
            methods_len: read_u16(&header[8..]) as usize,
        }
    }

    /// Byte count following the header: all fields plus the generator byte.
    pub fn body_len(&self) -> usize {
        self.pub_der_len
            + self.prime_len
            + 1
            + self.public_len
            + self.signature_len
            + self.methods_len
    }
}

impl<'a> ServerHello<'a> {
    /// The portion of the hello covered by the signature.
    pub fn signed_data(prime: &[u8], generator: u8, public: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(prime.len() + 1 + public.len());
        data.extend_from_slice(prime);
        data.push(generator);
        data.extend_from_slice(public);
        data
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = self.pub_der.len()
            + self.prime.len()
            + 1
            + self.public.len()
            + self.signature.len()
            + self.methods.len();
        let mut out = vec![0u8; HELLO_HEADER_LEN + body];
        write_u16(&mut out[0..], self.pub_der.len() as u16);
        write_u16(&mut out[2..], self.prime.len() as u16);
        write_u16(&mut out[4..], self.public.len() as u16);
        write_u16(&mut out[6..], self.signature.len() as u16);
        write_u16(&mut out[8..], self.methods.len() as u16);
        let mut cur = HELLO_HEADER_LEN;
        for field in [self.pub_der, self.prime] {
            out[cur..cur + field.len()].copy_from_slice(field);
            cur += field.len();
        }
        out[cur] = self.generator;
        cur += 1;
        for field in [self.public, self.signature, self.methods] {
            out[cur..cur + field.len()].copy_from_slice(field);
            cur += field.len();
        }
        out
    }

    /// Parse the body that follows a [`HelloHeader`].
    pub fn parse_body(header: &HelloHeader, body: &'a [u8]) -> Result<Self, ProtoError> {
        if body.len() < header.body_len() {
            return Err(ProtoError::Truncated("hello body"));
        }
        let mut cur = 0usize;
        let pub_der = &body[cur..cur + header.pub_der_len];
        cur += header.pub_der_len;
        let prime = &body[cur..cur + header.prime_len];
        cur += header.prime_len;
        let generator = body[cur];
        cur += 1;
        let public = &body[cur..cur + header.public_len];
        cur += header.public_len;
        let signature = &body[cur..cur + header.signature_len];
        cur += header.signature_len;
        let methods = &body[cur..cur + header.methods_len];
        Ok(Self {
            pub_der,
            prime,
            generator,
            public,
            signature,
            methods,
        })
    }
}

// ============================================================================
// Cipher exchange finish (client -> server)
// ============================================================================

/// Sizes header of the client finish: `[e_len u16, method_len u16]`,
/// followed by `E || method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishHeader {
    pub e_len: usize,
    pub method_len: usize,
}

impl FinishHeader {
    pub fn parse(header: [u8; 4], capacity: usize) -> Result<Self, ProtoError> {
        let e_len = read_u16(&header[0..]) as usize;
        let method_len = read_u16(&header[2..]) as usize;
        if e_len == 0 {
            return Err(ProtoError::LengthOutOfRange("client public length"));
        }
        if e_len + method_len > capacity {
            return Err(ProtoError::LengthOutOfRange("cipher exchange finish"));
        }
        Ok(Self { e_len, method_len })
    }

    pub fn body_len(&self) -> usize {
        self.e_len + self.method_len
    }
}

/// Client-side: encode the finish message.
pub fn write_client_finish(public: &[u8], method: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + public.len() + method.len());
    out.extend_from_slice(&(public.len() as u16).to_be_bytes());
    out.extend_from_slice(&(method.len() as u16).to_be_bytes());
    out.extend_from_slice(public);
    out.extend_from_slice(method.as_bytes());
    out
}

// ============================================================================
// Login
// ============================================================================

/// Client-side: login request, `[0, 0, user_len, passwd_len] || user || passwd`.
pub fn write_login_request(user: &str, passwd: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + user.len() + passwd.len());
    out.extend_from_slice(&[0, 0, user.len() as u8, passwd.len() as u8]);
    out.extend_from_slice(user.as_bytes());
    out.extend_from_slice(passwd.as_bytes());
    out
}

/// Login response: `[version u16, ok, msg_len u8] || msg`. The message is a
/// session id on success, a reason string on failure.
pub fn write_login_response(ok: bool, msg: &[u8]) -> Vec<u8> {
    debug_assert!(msg.len() <= u8::MAX as usize);
    let mut out = Vec::with_capacity(4 + msg.len());
    out.extend_from_slice(&PROTO_VERSION.to_be_bytes());
    out.push(if ok { B_TRUE } else { B_FALSE });
    out.push(msg.len() as u8);
    out.extend_from_slice(msg);
    out
}

// ============================================================================
// Mux frames
// ============================================================================

/// Parsed frame header; the payload of `payload_len` bytes follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u8,
    pub payload_len: usize,
}

impl FrameHeader {
    pub fn parse(header: [u8; FRAME_HEADER_LEN]) -> Result<Self, ProtoError> {
        if header[0] != PROTO_MAGIC {
            return Err(ProtoError::BadMagic(header[0]));
        }
        let payload_len = read_u16(&header[2..]) as usize;
        // Total frame, header included, must fit in MAX_FRAME.
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(ProtoError::LengthOutOfRange("frame payload"));
        }
        Ok(Self {
            kind: header[1],
            payload_len,
        })
    }
}

/// Remote host named by a `PACKET_NEW_CONN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRef<'a> {
    Ip(IpAddr),
    Domain(&'a [u8]),
}

/// One decoded mux frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    Proxy {
        conn_id: u32,
        data: &'a [u8],
    },
    NewConn {
        conn_id: u32,
        host: HostRef<'a>,
        port: u16,
    },
    CloseConn {
        conn_id: u32,
    },
    /// Kind byte this implementation does not know; consumed and ignored.
    Unknown {
        kind: u8,
    },
}

/// Decode a frame payload according to its kind byte.
pub fn parse_packet(kind: u8, payload: &[u8]) -> Result<Packet<'_>, ProtoError> {
    match kind {
        PACKET_PROXY => {
            if payload.len() < 4 {
                return Err(ProtoError::Truncated("proxy packet"));
            }
            Ok(Packet::Proxy {
                conn_id: read_u32(payload),
                data: &payload[4..],
            })
        }
        PACKET_NEW_CONN => {
            if payload.len() < 8 {
                return Err(ProtoError::Truncated("new-conn packet"));
            }
            let conn_type = payload[0];
            let addr_len = payload[1] as usize;
            let port = read_u16(&payload[2..]);
            let conn_id = read_u32(&payload[4..]);
            if payload.len() < 8 + addr_len {
                return Err(ProtoError::Truncated("new-conn address"));
            }
            let addr = &payload[8..8 + addr_len];
            let host = match conn_type {
                PROTO_ADDR_IP => match addr.len() {
                    4 => {
                        let mut ip = [0u8; 4];
                        ip.copy_from_slice(addr);
                        HostRef::Ip(IpAddr::from(ip))
                    }
                    16 => {
                        let mut ip = [0u8; 16];
                        ip.copy_from_slice(addr);
                        HostRef::Ip(IpAddr::from(ip))
                    }
                    _ => return Err(ProtoError::InvalidAddress),
                },
                PROTO_ADDR_DOMAIN => {
                    if addr.is_empty() {
                        return Err(ProtoError::InvalidAddress);
                    }
                    HostRef::Domain(addr)
                }
                _ => return Err(ProtoError::InvalidAddress),
            };
            Ok(Packet::NewConn {
                conn_id,
                host,
                port,
            })
        }
        PACKET_CLOSE_CONN => {
            if payload.len() < 4 {
                return Err(ProtoError::Truncated("close packet"));
            }
            Ok(Packet::CloseConn {
                conn_id: read_u32(payload),
            })
        }
        other => Ok(Packet::Unknown { kind: other }),
    }
}

/// Encode a `PACKET_CLOSE_CONN` frame.
pub fn write_close_frame(conn_id: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0] = PROTO_MAGIC;
    out[1] = PACKET_CLOSE_CONN;
    write_u16(&mut out[2..], 4);
    write_u32(&mut out[4..], conn_id);
    out
}

/// Encode a `PACKET_PROXY` frame carrying `data`.
///
/// `data` must fit in [`MAX_PROXY_CHUNK`]; callers chunk larger reads.
pub fn write_proxy_frame(conn_id: u32, data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= MAX_PROXY_CHUNK);
    let mut out = vec![0u8; FRAME_HEADER_LEN + 4 + data.len()];
    out[0] = PROTO_MAGIC;
    out[1] = PACKET_PROXY;
    write_u16(&mut out[2..], (4 + data.len()) as u16);
    write_u32(&mut out[4..], conn_id);
    out[8..].copy_from_slice(data);
    out
}

/// Encode a `PACKET_NEW_CONN` frame (client side and tests).
pub fn write_new_conn_frame(conn_id: u32, host: &HostRef<'_>, port: u16) -> Vec<u8> {
    let (conn_type, addr): (u8, Vec<u8>) = match host {
        HostRef::Ip(IpAddr::V4(ip)) => (PROTO_ADDR_IP, ip.octets().to_vec()),
        HostRef::Ip(IpAddr::V6(ip)) => (PROTO_ADDR_IP, ip.octets().to_vec()),
        HostRef::Domain(name) => (PROTO_ADDR_DOMAIN, name.to_vec()),
    };
    let payload_len = 8 + addr.len();
    let mut out = vec![0u8; FRAME_HEADER_LEN + payload_len];
    out[0] = PROTO_MAGIC;
    out[1] = PACKET_NEW_CONN;
    write_u16(&mut out[2..], payload_len as u16);
    out[4] = conn_type;
    out[5] = addr.len() as u8;
    write_u16(&mut out[6..], port);
    write_u32(&mut out[8..], conn_id);
    out[12..].copy_from_slice(&addr);
    out
}
