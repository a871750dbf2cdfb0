//! Device transport abstraction and the request/response exchange.
//!
//! The print session never touches the BLE stack directly; it drives a
//! [`Transport`], so the state machine can be exercised against a scripted
//! fake without hardware.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::time::Instant;

use crate::protocol::packet::Packet;
use crate::protocol::status::check_device_error;
use crate::{NiimbotError, Result};

/// One advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: Option<String>,
    pub address: String,
    /// Received signal strength in dBm, if the stack reported it.
    pub rssi: Option<i16>,
}

/// BLE connection to one printer: scan, connect, write, notifications.
///
/// Implementations allow one outstanding operation at a time; callers never
/// overlap writes.
#[async_trait]
pub trait Transport: Send {
    /// Start scanning; the stream ends when `timeout` elapses.
    async fn scan(&mut self, timeout: Duration) -> Result<BoxStream<'static, Advertisement>>;

    /// Connect to `address` and subscribe to notifications within `timeout`.
    async fn connect(&mut self, address: &str, timeout: Duration) -> Result<()>;

    /// Write one encoded packet.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Wait for the next notification.
    async fn read_notification(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Release the connection. Safe to call repeatedly or when not connected.
    async fn disconnect(&mut self);

    /// Drop notifications that arrived before the next request.
    fn clear_notifications(&mut self) {}
}

/// How long and how leniently to wait for a reply.
#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    pub timeout: Duration,
    /// Consecutive corrupt notifications tolerated before giving up.
    pub max_corrupt: u32,
}

/// Write one packet without waiting for a reply.
pub async fn send<T: Transport + ?Sized>(transport: &mut T, packet: &Packet) -> Result<()> {
    tracing::trace!(
        command = format_args!("{:#04x}", packet.command()),
        len = packet.payload().len(),
        "Sending packet"
    );
    transport.write(&packet.encode()).await
}

/// Write one packet and wait for its reply.
pub async fn request<T: Transport + ?Sized>(
    transport: &mut T,
    packet: &Packet,
    policy: ReadPolicy,
) -> Result<Packet> {
    transport.clear_notifications();
    send(transport, packet).await?;
    await_response(transport, policy).await
}

/// Wait for the next trustworthy packet.
///
/// Corrupt notifications are discarded and waiting continues within the same
/// deadline; `policy.max_corrupt` of them in a row is a protocol error.
/// Explicit printer error responses are protocol errors as well.
pub async fn await_response<T: Transport + ?Sized>(
    transport: &mut T,
    policy: ReadPolicy,
) -> Result<Packet> {
    let deadline = Instant::now() + policy.timeout;
    let mut corrupt = 0u32;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(NiimbotError::Timeout(policy.timeout));
        }
        let raw = transport
            .read_notification(remaining)
            .await
            .map_err(|e| match e {
                NiimbotError::Timeout(_) => NiimbotError::Timeout(policy.timeout),
                other => other,
            })?;

        match Packet::decode(&raw) {
            Ok(packet) => {
                check_device_error(&packet)?;
                return Ok(packet);
            }
            Err(err @ (NiimbotError::Checksum { .. } | NiimbotError::Framing(_))) => {
                corrupt += 1;
                tracing::warn!(error = %err, consecutive = corrupt, "Discarding corrupt notification");
                if corrupt >= policy.max_corrupt {
                    return Err(NiimbotError::Protocol(format!(
                        "{corrupt} consecutive corrupt notifications (last: {err})"
                    )));
                }
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory transport.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use futures::StreamExt;

    use super::*;
    use crate::ConnectionError;
    use crate::protocol::Command;

    type Responder = Box<dyn FnMut(&Packet) -> Vec<Vec<u8>> + Send>;

    /// Everything the fake observed, shared with the test after the
    /// transport has been moved into a session.
    #[derive(Debug, Default)]
    pub(crate) struct FakeLog {
        pub writes: Vec<Packet>,
        pub connects: usize,
        pub disconnects: usize,
        pub scans: usize,
    }

    impl FakeLog {
        pub fn commands(&self) -> Vec<u8> {
            self.writes.iter().map(|p| p.command()).collect()
        }

        pub fn io_attempted(&self) -> bool {
            self.connects > 0 || self.scans > 0 || !self.writes.is_empty()
        }
    }

    pub(crate) struct FakeTransport {
        log: Arc<Mutex<FakeLog>>,
        responder: Responder,
        queue: VecDeque<Vec<u8>>,
        connected: bool,
        pub advertisements: Vec<Advertisement>,
        pub connect_error: Option<ConnectionError>,
        /// Fail the n-th write (0-based) with a write error.
        pub fail_write_at: Option<usize>,
    }

    /// Acknowledge every command the way the firmware does: response code
    /// `command + 1`, payload `[1]`.
    pub(crate) fn ack(packet: &Packet) -> Vec<Vec<u8>> {
        match Command::from_code(packet.command()) {
            Some(cmd) if cmd.expects_response() => vec![
                Packet::new(packet.command().wrapping_add(1), vec![0x01])
                    .unwrap()
                    .encode(),
            ],
            _ => Vec::new(),
        }
    }

    pub(crate) fn status(page: u16, print: u8, feed: u8) -> Vec<u8> {
        let mut payload = page.to_be_bytes().to_vec();
        payload.extend_from_slice(&[print, feed]);
        Packet::new(0xb3, payload).unwrap().encode()
    }

    impl FakeTransport {
        pub fn new(responder: impl FnMut(&Packet) -> Vec<Vec<u8>> + Send + 'static) -> Self {
            Self {
                log: Arc::new(Mutex::new(FakeLog::default())),
                responder: Box::new(responder),
                queue: VecDeque::new(),
                connected: false,
                advertisements: Vec::new(),
                connect_error: None,
                fail_write_at: None,
            }
        }

        /// Acks everything; status polls report done immediately for `total` pages.
        pub fn healthy(total: u16) -> Self {
            Self::new(move |p| {
                if p.command() == Command::QueryStatus.code() {
                    vec![status(total, 100, 100)]
                } else {
                    ack(p)
                }
            })
        }

        pub fn log(&self) -> Arc<Mutex<FakeLog>> {
            Arc::clone(&self.log)
        }

        pub fn push_notification(&mut self, raw: Vec<u8>) {
            self.queue.push_back(raw);
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn scan(&mut self, _timeout: Duration) -> Result<BoxStream<'static, Advertisement>> {
            self.log.lock().unwrap().scans += 1;
            Ok(futures::stream::iter(self.advertisements.clone()).boxed())
        }

        async fn connect(&mut self, _address: &str, _timeout: Duration) -> Result<()> {
            self.log.lock().unwrap().connects += 1;
            if let Some(err) = self.connect_error.clone() {
                return Err(err.into());
            }
            self.connected = true;
            Ok(())
        }

        async fn write(&mut self, bytes: &[u8]) -> Result<()> {
            assert!(self.connected, "write on a closed connection");
            let packet = Packet::decode(bytes).expect("session wrote a malformed packet");
            let index = {
                let mut log = self.log.lock().unwrap();
                log.writes.push(packet.clone());
                log.writes.len() - 1
            };
            if self.fail_write_at == Some(index) {
                return Err(NiimbotError::Write("link lost".into()));
            }
            let replies = (self.responder)(&packet);
            self.queue.extend(replies);
            Ok(())
        }

        async fn read_notification(&mut self, timeout: Duration) -> Result<Vec<u8>> {
            match self.queue.pop_front() {
                Some(raw) => Ok(raw),
                None => {
                    tokio::time::sleep(timeout).await;
                    Err(NiimbotError::Timeout(timeout))
                }
            }
        }

        async fn disconnect(&mut self) {
            self.log.lock().unwrap().disconnects += 1;
            self.connected = false;
        }
    }
}
