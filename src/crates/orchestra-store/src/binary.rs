//! CXDB binary write protocol
//!
//! The HTTP API is read-only; writes (create context, append turn) speak
//! a framed binary protocol over TCP. Frame format: 16-byte little-endian
//! header `{payload_len:u32, msg_type:u16, flags:u16, req_id:u64}`
//! followed by the payload. All writes serialize behind one connection
//! lock.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use rmpv::Value as MpValue;

use crate::error::{Result, StoreError};

pub const MSG_HELLO: u16 = 1;
pub const MSG_CTX_CREATE: u16 = 2;
pub const MSG_APPEND_TURN: u16 = 5;
pub const MSG_ERROR: u16 = 255;

pub const ENCODING_MSGPACK: u32 = 1;
pub const COMPRESSION_NONE: u32 = 0;

const HEADER_SIZE: usize = 16;
const CLIENT_TAG: &str = "orchestra-v0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextHead {
    pub context_id: u64,
    pub head_turn_id: u64,
    pub head_depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendedTurn {
    pub context_id: u64,
    pub turn_id: u64,
    pub depth: u32,
}

struct Connection {
    stream: TcpStream,
    req_counter: u64,
}

/// TCP client for CXDB binary writes
pub struct CxdbBinaryClient {
    host: String,
    port: u16,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl CxdbBinaryClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(10),
            connection: Mutex::new(None),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect(&self) -> Result<Connection> {
        let stream = TcpStream::connect(self.address()).map_err(|e| StoreError::Connection {
            url: self.address(),
            detail: e.to_string(),
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut connection = Connection { stream, req_counter: 0 };
        self.handshake(&mut connection)?;
        Ok(connection)
    }

    fn handshake(&self, connection: &mut Connection) -> Result<()> {
        // protocol_version:u16 + tag_len:u16 + tag + meta_len:u32 (0)
        let tag = CLIENT_TAG.as_bytes();
        let mut payload = Vec::with_capacity(8 + tag.len());
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&(tag.len() as u16).to_le_bytes());
        payload.extend_from_slice(tag);
        payload.extend_from_slice(&0u32.to_le_bytes());

        send_frame(connection, MSG_HELLO, &payload)?;
        let (msg_type, response) = recv_frame(connection)?;
        if msg_type == MSG_ERROR {
            return Err(parse_error(&response));
        }
        if msg_type != MSG_HELLO {
            return Err(StoreError::Protocol(format!(
                "expected HELLO response, got msg_type={msg_type}"
            )));
        }
        Ok(())
    }

    fn request(&self, msg_type: u16, payload: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.connection.lock().unwrap();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let connection = guard.as_mut().expect("just connected");

        send_frame(connection, msg_type, payload)?;
        let (response_type, response) = recv_frame(connection)?;
        if response_type == MSG_ERROR {
            return Err(parse_error(&response));
        }
        if response_type != msg_type {
            return Err(StoreError::Protocol(format!(
                "expected msg_type={msg_type} response, got {response_type}"
            )));
        }
        Ok(response)
    }

    /// Create a context, optionally forked from a base turn
    pub fn create_context(&self, base_turn_id: u64) -> Result<ContextHead> {
        let response = self.request(MSG_CTX_CREATE, &base_turn_id.to_le_bytes())?;
        if response.len() < 20 {
            return Err(StoreError::Protocol(format!(
                "CTX_CREATE response too short: {} bytes",
                response.len()
            )));
        }
        Ok(ContextHead {
            context_id: read_u64(&response, 0),
            head_turn_id: read_u64(&response, 8),
            head_depth: read_u32(&response, 16),
        })
    }

    /// Append one typed turn; the payload is msgpack keyed by field tags
    pub fn append_turn(
        &self,
        context_id: u64,
        type_id: &str,
        type_version: u32,
        data: &MpValue,
    ) -> Result<AppendedTurn> {
        let mut payload_bytes = Vec::new();
        rmpv::encode::write_value(&mut payload_bytes, data)
            .map_err(|e| StoreError::Protocol(format!("msgpack encode failed: {e}")))?;
        let content_hash = blake3::hash(&payload_bytes);
        let type_id_bytes = type_id.as_bytes();

        let mut buf = Vec::with_capacity(64 + type_id_bytes.len() + payload_bytes.len());
        buf.extend_from_slice(&context_id.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes()); // parent_turn_id
        buf.extend_from_slice(&(type_id_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(type_id_bytes);
        buf.extend_from_slice(&type_version.to_le_bytes());
        buf.extend_from_slice(&ENCODING_MSGPACK.to_le_bytes());
        buf.extend_from_slice(&COMPRESSION_NONE.to_le_bytes());
        buf.extend_from_slice(&(payload_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(content_hash.as_bytes());
        buf.extend_from_slice(&(payload_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload_bytes);
        buf.extend_from_slice(&0u32.to_le_bytes()); // no idempotency key

        let response = self.request(MSG_APPEND_TURN, &buf)?;
        if response.len() < 20 {
            return Err(StoreError::Protocol(format!(
                "APPEND_TURN response too short: {} bytes",
                response.len()
            )));
        }
        Ok(AppendedTurn {
            context_id: read_u64(&response, 0),
            turn_id: read_u64(&response, 8),
            depth: read_u32(&response, 16),
        })
    }

    pub fn close(&self) {
        *self.connection.lock().unwrap() = None;
    }
}

fn send_frame(connection: &mut Connection, msg_type: u16, payload: &[u8]) -> Result<()> {
    connection.req_counter += 1;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&msg_type.to_le_bytes());
    frame.extend_from_slice(&0u16.to_le_bytes()); // flags
    frame.extend_from_slice(&connection.req_counter.to_le_bytes());
    frame.extend_from_slice(payload);
    connection.stream.write_all(&frame)?;
    Ok(())
}

fn recv_frame(connection: &mut Connection) -> Result<(u16, Vec<u8>)> {
    let mut header = [0u8; HEADER_SIZE];
    connection.stream.read_exact(&mut header)?;
    let payload_len = read_u32(&header, 0) as usize;
    let msg_type = u16::from_le_bytes([header[4], header[5]]);

    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        connection.stream.read_exact(&mut payload)?;
    }
    Ok((msg_type, payload))
}

fn parse_error(payload: &[u8]) -> StoreError {
    if payload.len() >= 8 {
        let code = read_u32(payload, 0);
        let detail_len = read_u32(payload, 4) as usize;
        let end = (8 + detail_len).min(payload.len());
        let detail = String::from_utf8_lossy(&payload[8..end]).to_string();
        StoreError::Server { code, detail }
    } else {
        StoreError::Protocol(format!("malformed error frame: {payload:?}"))
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().expect("bounds checked"))
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().expect("bounds checked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// Minimal in-process CXDB speaking just enough protocol for the client
    fn spawn_fake_server() -> (std::net::SocketAddr, std::thread::JoinHandle<Vec<(u16, Vec<u8>)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            let mut next_turn_id = 0u64;

            loop {
                let mut header = [0u8; HEADER_SIZE];
                if stream.read_exact(&mut header).is_err() {
                    break;
                }
                let payload_len = read_u32(&header, 0) as usize;
                let msg_type = u16::from_le_bytes([header[4], header[5]]);
                let req_id = read_u64(&header, 8);
                let mut payload = vec![0u8; payload_len];
                stream.read_exact(&mut payload).unwrap();
                seen.push((msg_type, payload.clone()));

                let response: Vec<u8> = match msg_type {
                    MSG_HELLO => 7u64.to_le_bytes().to_vec(),
                    MSG_CTX_CREATE => {
                        let mut r = 42u64.to_le_bytes().to_vec();
                        r.extend_from_slice(&0u64.to_le_bytes());
                        r.extend_from_slice(&0u32.to_le_bytes());
                        r
                    }
                    MSG_APPEND_TURN => {
                        next_turn_id += 1;
                        let mut r = 42u64.to_le_bytes().to_vec();
                        r.extend_from_slice(&next_turn_id.to_le_bytes());
                        r.extend_from_slice(&(next_turn_id as u32).to_le_bytes());
                        r
                    }
                    _ => break,
                };

                let mut frame = (response.len() as u32).to_le_bytes().to_vec();
                frame.extend_from_slice(&msg_type.to_le_bytes());
                frame.extend_from_slice(&0u16.to_le_bytes());
                frame.extend_from_slice(&req_id.to_le_bytes());
                frame.extend_from_slice(&response);
                stream.write_all(&frame).unwrap();

                if seen.len() >= 3 {
                    break;
                }
            }
            seen
        });

        (addr, handle)
    }

    #[test]
    fn test_create_context_and_append_turn() {
        let (addr, server) = spawn_fake_server();
        let client = CxdbBinaryClient::new(addr.ip().to_string(), addr.port());

        let head = client.create_context(0).unwrap();
        assert_eq!(head.context_id, 42);

        let data = MpValue::Map(vec![(MpValue::from(1u64), MpValue::from("demo"))]);
        let appended = client
            .append_turn(head.context_id, "dev.orchestra.PipelineLifecycle", 2, &data)
            .unwrap();
        assert_eq!(appended.context_id, 42);
        assert_eq!(appended.turn_id, 1);

        client.close();
        let seen = server.join().unwrap();

        // HELLO, CTX_CREATE, APPEND_TURN in order
        assert_eq!(
            seen.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
            vec![MSG_HELLO, MSG_CTX_CREATE, MSG_APPEND_TURN]
        );

        // APPEND_TURN layout: ctx, parent, type id, version, encoding,
        // compression, payload length, 32-byte hash
        let append = &seen[2].1;
        assert_eq!(read_u64(append, 0), 42);
        assert_eq!(read_u64(append, 8), 0);
        let type_id_len = read_u32(append, 16) as usize;
        let type_id = std::str::from_utf8(&append[20..20 + type_id_len]).unwrap();
        assert_eq!(type_id, "dev.orchestra.PipelineLifecycle");

        let mut offset = 20 + type_id_len;
        assert_eq!(read_u32(append, offset), 2); // type_version
        offset += 4;
        assert_eq!(read_u32(append, offset), ENCODING_MSGPACK);
        offset += 4;
        assert_eq!(read_u32(append, offset), COMPRESSION_NONE);
        offset += 4;
        let payload_len = read_u32(append, offset) as usize;
        offset += 4;
        let hash = &append[offset..offset + 32];
        offset += 32;
        assert_eq!(read_u32(append, offset) as usize, payload_len);
        offset += 4;
        let payload = &append[offset..offset + payload_len];
        assert_eq!(blake3::hash(payload).as_bytes(), hash);
    }

    #[test]
    fn test_connection_refused_is_a_connection_error() {
        // Port 1 is never a CXDB
        let client = CxdbBinaryClient::new("127.0.0.1", 1);
        let err = client.create_context(0).unwrap_err();
        assert!(matches!(err, StoreError::Connection { .. }));
    }
}
