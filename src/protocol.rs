use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::error::{Error, Result};

#[cfg(test)]
use std::{collections::VecDeque, sync::Mutex};

/// Port every legacy Kasa device listens on, for both TCP and UDP.
pub const PORT: u16 = 9999;

const INITIAL_KEY: u8 = 0xAB;
const MAX_RESPONSE_LEN: usize = 1 << 20;

// Encrypt a message for a UDP datagram; no length prefix.
// see: https://www.softscheck.com/en/reverse-engineering-tp-link-hs110/
pub fn encrypt_datagram(plain: &str) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .as_bytes()
        .iter()
        .map(|byte| {
            key ^= byte;
            key
        })
        .collect()
}

// Encrypt a message for a TCP stream, prefixed with its big-endian length.
pub fn encrypt(plain: &str) -> Vec<u8> {
    let mut cipher = vec![0_u8; 4];
    BigEndian::write_u32(&mut cipher, plain.len() as u32);
    cipher.extend(encrypt_datagram(plain));
    cipher
}

// Decrypt received bytes in place
pub fn decrypt(cipher: &mut [u8]) -> String {
    let mut key = INITIAL_KEY;
    let mut next: u8;

    for item in cipher.iter_mut() {
        next = *item;
        *item ^= key;
        key = next;
    }

    String::from_utf8_lossy(cipher).into_owned()
}

#[async_trait]
pub trait Protocol: Send + Sync {
    async fn send(&self, addr: SocketAddr, msg: &str) -> Result<String>;
}

/// Request/response over a fresh TCP connection per message.
pub struct DefaultProtocol {
    timeout: Duration,
}

impl DefaultProtocol {
    pub fn new(timeout: Duration) -> DefaultProtocol {
        DefaultProtocol { timeout }
    }

    async fn exchange(&self, addr: SocketAddr, msg: &str) -> Result<String> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&encrypt(msg)).await?;

        let mut header = [0_u8; 4];
        stream.read_exact(&mut header).await?;
        let len = BigEndian::read_u32(&header) as usize;
        if len > MAX_RESPONSE_LEN {
            return Err(Error::Other(format!(
                "response from {} too large: {} bytes",
                addr, len
            )));
        }

        let mut body = vec![0_u8; len];
        stream.read_exact(&mut body).await?;

        Ok(decrypt(&mut body))
    }
}

impl Default for DefaultProtocol {
    fn default() -> Self {
        DefaultProtocol::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Protocol for DefaultProtocol {
    async fn send(&self, addr: SocketAddr, msg: &str) -> Result<String> {
        tracing::trace!(%addr, %msg, "sending");
        timeout(self.timeout, self.exchange(addr, msg))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}

#[cfg(test)]
pub struct ProtocolMock {
    requests: Mutex<Vec<(SocketAddr, String)>>,
    responses: Mutex<VecDeque<Result<String>>>,
}

#[cfg(test)]
impl ProtocolMock {
    pub fn new() -> ProtocolMock {
        ProtocolMock {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_response(&self, resp: Result<String>) {
        self.responses.lock().unwrap().push_back(resp);
    }

    pub fn requests(&self) -> Vec<(SocketAddr, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Protocol for ProtocolMock {
    async fn send(&self, addr: SocketAddr, msg: &str) -> Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push((addr, msg.to_string()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::from("")))
    }
}
