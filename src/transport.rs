//! # Transport Layer
//!
//! The transport owns the socket and moves PDUs on and off the wire. Two
//! framings are supported over one TCP connection:
//!
//! - **Modbus TCP**: MBAP header (transaction id, protocol id, length, unit id) + PDU
//! - **RTU over TCP**: unit id + PDU + CRC16/MODBUS, as spoken by
//!   serial-to-Ethernet gateways in raw socket mode
//!
//! [`ConnectParams::use_tcp`] picks the framing at connect time.
//!
//! ## Failure handling
//!
//! Every I/O step is bounded by the request timeout. A socket error, a
//! timeout, or a malformed frame drops the socket, so
//! [`ModbusTransport::is_connected`] reports `false` until the next connect.
//! A request future that is dropped before it completes leaves the stream in
//! an unknown position, though the session still counts as open. The next
//! request notices, reopens the socket with the last connect parameters and
//! then goes ahead, so a late reply can never be read as the answer to a
//! newer request.

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ConnectParams;
use crate::constants::{EXCEPTION_FLAG, MAX_MBAP_LENGTH, MAX_RTU_FRAME_SIZE, MBAP_HEADER_LEN, RTU_CRC_LEN};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{decode_response, ModbusPdu};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, UnitId};

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Format raw bytes as hex string for packet logging
fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_packet(direction: &str, data: &[u8], framing: Framing, unit_id: UnitId) {
    info!(
        "[MODBUS-{}] {} unit:{} {}",
        framing,
        direction,
        unit_id,
        format_hex_packet(data)
    );
}

/// Wire framing used on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// MBAP header framing (Modbus TCP)
    #[default]
    Tcp,
    /// RTU framing with CRC carried over a raw TCP socket
    Rtu,
}

impl Framing {
    pub fn from_params(params: &ConnectParams) -> Self {
        if params.use_tcp {
            Self::Tcp
        } else {
            Self::Rtu
        }
    }
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Rtu => write!(f, "RTU"),
        }
    }
}

/// Transport layer abstraction
///
/// Implementations exchange one request for one response at a time. They
/// must be `Send + Sync` so a poller task can own them.
pub trait ModbusTransport: Send + Sync {
    /// Open a session, replacing any existing one
    fn connect(&mut self, params: &ConnectParams) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Send a request and wait for its response
    fn request(
        &mut self,
        request: &ModbusRequest,
    ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send;

    /// Whether a usable session is open
    fn is_connected(&self) -> bool;

    /// Close the session
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Transport statistics
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub connects: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Modbus transport over a TCP socket with selectable framing
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: Option<String>,
    params: Option<ConnectParams>,
    framing: Framing,
    timeout: Duration,
    transaction_id: u16,
    in_flight: bool,
    stats: TransportStats,
    packet_logging: bool,
}

impl TcpTransport {
    /// Create an unconnected transport with the given per-step I/O timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            stream: None,
            peer: None,
            params: None,
            framing: Framing::default(),
            timeout,
            transaction_id: 0,
            in_flight: false,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable hex packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Framing selected by the last connect
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// `host:port` of the current or last session
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn drop_stream(&mut self) {
        if self.stream.take().is_some() {
            debug!("Dropping socket to {:?}", self.peer);
        }
    }

    /// Reopen the socket after a request was abandoned mid-exchange
    async fn resync(&mut self) -> ModbusResult<()> {
        self.in_flight = false;
        self.drop_stream();
        self.stats.errors += 1;
        let params = self.params.clone().ok_or(ModbusError::NotConnected)?;
        warn!(
            "Previous request to {} was abandoned before its response; reconnecting",
            params.address()
        );
        ModbusTransport::connect(self, &params).await
    }

    async fn exchange(&mut self, request: &ModbusRequest, pdu: &[u8]) -> ModbusResult<ModbusResponse> {
        let tid = self.next_transaction_id();
        let frame = match self.framing {
            Framing::Tcp => encode_mbap_frame(tid, request.unit_id, pdu),
            Framing::Rtu => encode_rtu_frame(request.unit_id, pdu),
        };

        if self.packet_logging {
            log_packet("send", &frame, self.framing, request.unit_id);
        }

        let io_timeout = self.timeout;
        let framing = self.framing;
        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;

        step(io_timeout, "send request", stream.write_all(&frame)).await?;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        let reply = match framing {
            Framing::Tcp => read_mbap_frame(stream, io_timeout).await?,
            Framing::Rtu => read_rtu_frame(stream, io_timeout).await?,
        };
        self.stats.responses_received += 1;
        self.stats.bytes_received += reply.len() as u64;

        if self.packet_logging {
            log_packet("receive", &reply, framing, request.unit_id);
        }

        let (unit_id, pdu) = match framing {
            Framing::Tcp => split_mbap_frame(&reply, tid)?,
            Framing::Rtu => split_rtu_frame(&reply)?,
        };
        if unit_id != request.unit_id {
            return Err(ModbusError::protocol(format!(
                "Response unit ID mismatch: expected {}, got {}",
                request.unit_id, unit_id
            )));
        }

        let response = decode_response(unit_id, pdu)?;
        if response.function != request.function {
            return Err(ModbusError::protocol(format!(
                "Response function mismatch: expected {}, got {}",
                request.function, response.function
            )));
        }
        Ok(response)
    }
}

impl ModbusTransport for TcpTransport {
    async fn connect(&mut self, params: &ConnectParams) -> ModbusResult<()> {
        self.drop_stream();
        self.in_flight = false;
        self.framing = Framing::from_params(params);
        let address = params.address();
        self.peer = Some(address.clone());
        self.params = Some(params.clone());

        let stream = match timeout(self.timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(ModbusError::connection(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )));
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                return Err(ModbusError::timeout(
                    format!("connect to {}", address),
                    self.timeout_ms(),
                ));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", address, e);
        }

        self.stream = Some(stream);
        self.stats.connects += 1;
        info!("Connected to {} ({} framing)", address, self.framing);
        Ok(())
    }

    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let pdu = ModbusPdu::encode_request(request)?;
        if self.in_flight {
            self.resync().await?;
        }
        if self.stream.is_none() {
            return Err(ModbusError::NotConnected);
        }

        self.in_flight = true;
        let result = self.exchange(request, pdu.as_slice()).await;
        self.in_flight = false;

        if let Err(ref e) = result {
            self.stats.errors += 1;
            if matches!(e, ModbusError::Timeout { .. }) {
                self.stats.timeouts += 1;
            }
            // An exception response leaves the stream aligned; anything else does not
            if !matches!(e, ModbusError::Exception { .. }) {
                self.drop_stream();
            }
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.in_flight = false;
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Run one I/O step under the request timeout
async fn step<T, F>(io_timeout: Duration, operation: &str, fut: F) -> ModbusResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(io_timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ModbusError::io(format!("{}: {}", operation, e))),
        Err(_) => Err(ModbusError::timeout(operation, io_timeout.as_millis() as u64)),
    }
}

/// MBAP header + unit id + PDU
pub fn encode_mbap_frame(transaction_id: u16, unit_id: UnitId, pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
    frame.put_u16(transaction_id);
    frame.put_u16(0);
    frame.put_u16((pdu.len() + 1) as u16);
    frame.put_u8(unit_id);
    frame.put_slice(pdu);
    frame
}

/// Unit id + PDU + CRC (little-endian)
pub fn encode_rtu_frame(unit_id: UnitId, pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(1 + pdu.len() + RTU_CRC_LEN);
    frame.put_u8(unit_id);
    frame.put_slice(pdu);
    let crc = CRC_MODBUS.checksum(&frame);
    frame.put_u16_le(crc);
    frame
}

async fn read_mbap_frame(stream: &mut TcpStream, io_timeout: Duration) -> ModbusResult<Vec<u8>> {
    let mut header = [0u8; MBAP_HEADER_LEN];
    step(io_timeout, "read response header", stream.read_exact(&mut header)).await?;

    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    if !(2..=MAX_MBAP_LENGTH).contains(&length) {
        return Err(ModbusError::frame(format!("Invalid MBAP length field: {}", length)));
    }

    let mut frame = vec![0u8; MBAP_HEADER_LEN + length];
    frame[..MBAP_HEADER_LEN].copy_from_slice(&header);
    step(
        io_timeout,
        "read response data",
        stream.read_exact(&mut frame[MBAP_HEADER_LEN..]),
    )
    .await?;
    Ok(frame)
}

/// Validate an MBAP frame and return (unit id, PDU)
pub fn split_mbap_frame(frame: &[u8], expected_tid: u16) -> ModbusResult<(UnitId, &[u8])> {
    if frame.len() < MBAP_HEADER_LEN + 2 {
        return Err(ModbusError::frame("MBAP frame too short"));
    }
    let tid = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;

    if tid != expected_tid {
        return Err(ModbusError::frame(format!(
            "Transaction ID mismatch: expected {}, got {}",
            expected_tid, tid
        )));
    }
    if protocol_id != 0 {
        return Err(ModbusError::frame(format!("Unknown protocol ID {}", protocol_id)));
    }
    if frame.len() != MBAP_HEADER_LEN + length {
        return Err(ModbusError::frame("MBAP length does not match frame size"));
    }
    Ok((frame[MBAP_HEADER_LEN], &frame[MBAP_HEADER_LEN + 1..]))
}

async fn read_rtu_frame(stream: &mut TcpStream, io_timeout: Duration) -> ModbusResult<Vec<u8>> {
    let mut frame = vec![0u8; 2];
    step(io_timeout, "read response header", stream.read_exact(&mut frame)).await?;

    let function_code = frame[1];
    let remaining = if function_code & EXCEPTION_FLAG != 0 {
        1 + RTU_CRC_LEN
    } else {
        match ModbusFunction::from_u8(function_code)? {
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                4 + RTU_CRC_LEN
            }
            _ => {
                let mut byte_count = [0u8; 1];
                step(io_timeout, "read byte count", stream.read_exact(&mut byte_count)).await?;
                frame.push(byte_count[0]);
                byte_count[0] as usize + RTU_CRC_LEN
            }
        }
    };

    if frame.len() + remaining > MAX_RTU_FRAME_SIZE {
        return Err(ModbusError::frame("RTU frame too large"));
    }

    let start = frame.len();
    frame.resize(start + remaining, 0);
    step(io_timeout, "read response data", stream.read_exact(&mut frame[start..])).await?;
    Ok(frame)
}

/// Validate an RTU frame's CRC and return (unit id, PDU)
pub fn split_rtu_frame(frame: &[u8]) -> ModbusResult<(UnitId, &[u8])> {
    if frame.len() < 2 + RTU_CRC_LEN {
        return Err(ModbusError::frame("RTU frame too short"));
    }
    let body_len = frame.len() - RTU_CRC_LEN;
    let received = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);
    let calculated = CRC_MODBUS.checksum(&frame[..body_len]);
    if received != calculated {
        return Err(ModbusError::crc_mismatch(calculated, received));
    }
    Ok((frame[0], &frame[1..body_len]))
}
