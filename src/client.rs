//! Modbus bus client
//!
//! The client layers typed reads and writes over a [`ModbusTransport`]. It
//! builds the request, hands it to the transport, and checks that the
//! response carries exactly what was asked for.
//!
//! Each function code has a numeric method (`read_04`) and a named alias
//! (`read_input_registers`); the poller uses the aliases. Only the six codes
//! a Heru unit answers are exposed: FC01 to FC04 for reads, FC0F and FC10
//! for writes. Single-item writes go out as one-element FC0F/FC10 requests.
//!
//! ```rust,no_run
//! use heru_modbus::{ConnectParams, ModbusClient, ModbusResult, ModbusTcpClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut bus = ModbusTcpClient::new(Duration::from_secs(5));
//!     bus.connect(&ConnectParams::new("192.168.1.50", 4001)).await?;
//!
//!     // Outdoor temperature in tenths of a degree
//!     let outdoor = bus.read_input_registers(1, 1, 1).await?;
//!     println!("Outdoor raw: {:?}", outdoor);
//!
//!     // Boost on
//!     bus.write_multiple_coils(1, 2, &[true]).await?;
//!     bus.close().await
//! }
//! ```
use std::future::Future;
use std::time::Duration;

use crate::config::ConnectParams;
use crate::error::ModbusResult;
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, UnitId};
use crate::transport::{ModbusTransport, TcpTransport, TransportStats};

/// Bus operations the poller depends on.
///
/// Implemented by [`GenericModbusClient`] for any transport and by
/// [`ModbusTcpClient`] for a socket. Tests substitute their own
/// implementation. Quantities beyond the `MAX_READ_*`/`MAX_WRITE_*` limits
/// in [`crate::constants`] are rejected before any I/O.
pub trait ModbusClient: Send + Sync {
    /// Open a session, replacing any existing one.
    fn connect(&mut self, params: &ConnectParams) -> impl Future<Output = ModbusResult<()>> + Send;

    /// FC01: `quantity` coil states starting at `address`
    fn read_01(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// FC02
    fn read_02(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// FC03: exactly `quantity` register values, or an error
    fn read_03(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// FC04
    fn read_04(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// FC0F; succeeds once the unit echoes the address and count
    fn write_0f(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// FC10; succeeds once the unit echoes the address and count
    fn write_10(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Whether a session is currently open.
    fn is_connected(&self) -> bool;

    /// Close the session.
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Counters from the underlying transport
    fn get_stats(&self) -> TransportStats;

    /// Same as [`Self::read_01`]
    fn read_coils(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_01(unit_id, address, quantity)
    }

    /// Same as [`Self::read_02`]
    fn read_discrete_inputs(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_02(unit_id, address, quantity)
    }

    /// Same as [`Self::read_03`]
    fn read_holding_registers(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_03(unit_id, address, quantity)
    }

    /// Same as [`Self::read_04`]
    fn read_input_registers(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_04(unit_id, address, quantity)
    }

    /// Same as [`Self::write_0f`]
    fn write_multiple_coils(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_0f(unit_id, address, values)
    }

    /// Same as [`Self::write_10`]
    fn write_multiple_registers(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_10(unit_id, address, values)
    }
}

/// Client that works with any transport
///
/// Holds the application layer (request construction and response checks)
/// and delegates framing and I/O to the transport.
pub struct GenericModbusClient<T: ModbusTransport> {
    transport: T,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Execute a raw request
    pub async fn execute_request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        request.validate()?;
        self.transport.request(request).await
    }

    async fn read_bits(
        &mut self,
        function: ModbusFunction,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        let request = ModbusRequest::new_read(unit_id, function, address, quantity);
        let response = self.execute_request(&request).await?;
        response.parse_bits(quantity)
    }

    async fn read_words(
        &mut self,
        function: ModbusFunction,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::new_read(unit_id, function, address, quantity);
        let response = self.execute_request(&request).await?;
        response.parse_registers(quantity)
    }

    async fn write(&mut self, request: ModbusRequest) -> ModbusResult<()> {
        let response = self.execute_request(&request).await?;
        response.check_write_echo(&request)
    }
}

impl<T: ModbusTransport + Send + Sync> ModbusClient for GenericModbusClient<T> {
    async fn connect(&mut self, params: &ConnectParams) -> ModbusResult<()> {
        self.transport.connect(params).await
    }

    async fn read_01(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(ModbusFunction::ReadCoils, unit_id, address, quantity)
            .await
    }

    async fn read_02(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(ModbusFunction::ReadDiscreteInputs, unit_id, address, quantity)
            .await
    }

    async fn read_03(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_words(ModbusFunction::ReadHoldingRegisters, unit_id, address, quantity)
            .await
    }

    async fn read_04(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_words(ModbusFunction::ReadInputRegisters, unit_id, address, quantity)
            .await
    }

    async fn write_0f(&mut self, unit_id: UnitId, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.write(ModbusRequest::write_coils(unit_id, address, values)?)
            .await
    }

    async fn write_10(&mut self, unit_id: UnitId, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.write(ModbusRequest::write_registers(unit_id, address, values)?)
            .await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

/// Socket client for Modbus TCP or RTU-over-TCP, chosen at connect time
pub struct ModbusTcpClient {
    inner: GenericModbusClient<TcpTransport>,
}

impl ModbusTcpClient {
    /// Create an unconnected client; every socket step is bounded by `request_timeout`
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            inner: GenericModbusClient::new(TcpTransport::new(request_timeout)),
        }
    }

    /// Enable or disable hex dumps of every frame
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.inner.transport_mut().set_packet_logging(enabled);
    }

    /// Peer address of the open session
    pub fn peer(&self) -> Option<&str> {
        self.inner.transport().peer()
    }
}

impl ModbusClient for ModbusTcpClient {
    async fn connect(&mut self, params: &ConnectParams) -> ModbusResult<()> {
        self.inner.connect(params).await
    }

    async fn read_01(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.inner.read_01(unit_id, address, quantity).await
    }

    async fn read_02(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.inner.read_02(unit_id, address, quantity).await
    }

    async fn read_03(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.inner.read_03(unit_id, address, quantity).await
    }

    async fn read_04(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.inner.read_04(unit_id, address, quantity).await
    }

    async fn write_0f(&mut self, unit_id: UnitId, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.inner.write_0f(unit_id, address, values).await
    }

    async fn write_10(&mut self, unit_id: UnitId, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.inner.write_10(unit_id, address, values).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.inner.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.inner.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModbusError;
    use crate::protocol::pack_bits;

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct Script {
        open: bool,
        sent: Vec<ModbusRequest>,
        replies: VecDeque<ModbusResult<ModbusResponse>>,
    }

    /// Transport that answers from a prepared list of replies
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<Script>,
    }

    impl ScriptedTransport {
        fn replying(reply: ModbusResult<ModbusResponse>) -> Self {
            let transport = Self::default();
            transport.script.lock().unwrap().replies.push_back(reply);
            transport
        }

        fn sent(&self) -> Vec<ModbusRequest> {
            self.script.lock().unwrap().sent.clone()
        }
    }

    impl ModbusTransport for ScriptedTransport {
        fn connect(&mut self, _params: &ConnectParams) -> impl Future<Output = ModbusResult<()>> + Send {
            self.script.lock().unwrap().open = true;
            async { Ok(()) }
        }

        fn request(
            &mut self,
            request: &ModbusRequest,
        ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send {
            let mut script = self.script.lock().unwrap();
            script.sent.push(request.clone());
            let reply = script
                .replies
                .pop_front()
                .unwrap_or(Err(ModbusError::NotConnected));
            async move { reply }
        }

        fn is_connected(&self) -> bool {
            self.script.lock().unwrap().open
        }

        fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send {
            self.script.lock().unwrap().open = false;
            async { Ok(()) }
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    fn register_response(function: ModbusFunction, values: &[u16]) -> ModbusResponse {
        let mut data = vec![(values.len() * 2) as u8];
        data.extend(values.iter().flat_map(|v| v.to_be_bytes()));
        ModbusResponse::new(1, function, data)
    }

    fn coil_response(function: ModbusFunction, coils: &[bool]) -> ModbusResponse {
        let packed = pack_bits(coils);
        let mut data = vec![packed.len() as u8];
        data.extend_from_slice(&packed);
        ModbusResponse::new(1, function, data)
    }

    fn echo_response(function: ModbusFunction, address: u16, quantity: u16) -> ModbusResponse {
        let mut data = address.to_be_bytes().to_vec();
        data.extend_from_slice(&quantity.to_be_bytes());
        ModbusResponse::new(1, function, data)
    }

    #[tokio::test]
    async fn test_connect_delegates_to_transport() {
        let mut client = GenericModbusClient::new(ScriptedTransport::default());
        assert!(!client.is_connected());
        assert_ok!(client.connect(&ConnectParams::new("127.0.0.1", 502)).await);
        assert!(client.is_connected());
        assert_ok!(client.close().await);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_read_04_exact_quantity() {
        let values: Vec<u16> = (0..33).collect();
        let transport =
            ScriptedTransport::replying(Ok(register_response(ModbusFunction::ReadInputRegisters, &values)));

        let mut client = GenericModbusClient::new(transport);
        assert_eq!(assert_ok!(client.read_input_registers(1, 0, 33).await), values);

        let requests = client.transport().sent();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].function, ModbusFunction::ReadInputRegisters);
        assert_eq!(requests[0].quantity, 33);
    }

    #[tokio::test]
    async fn test_read_02_drops_padding_bits() {
        let mut inputs = vec![false; 25];
        inputs[0] = true;
        inputs[24] = true;
        let transport =
            ScriptedTransport::replying(Ok(coil_response(ModbusFunction::ReadDiscreteInputs, &inputs)));

        let mut client = GenericModbusClient::new(transport);
        let result = assert_ok!(client.read_02(1, 9, 25).await);
        assert_eq!(result, inputs);
        assert_eq!(client.transport().sent()[0].address, 9);
    }

    #[tokio::test]
    async fn test_short_register_response_is_rejected() {
        let transport =
            ScriptedTransport::replying(Ok(register_response(ModbusFunction::ReadHoldingRegisters, &[1, 2])));
        let mut client = GenericModbusClient::new(transport);
        let err = assert_err!(client.read_03(1, 0, 3).await);
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[tokio::test]
    async fn test_invalid_quantity_never_reaches_transport() {
        let mut client = GenericModbusClient::new(ScriptedTransport::default());
        assert_err!(client.read_03(1, 0, 126).await);
        assert_err!(client.write_0f(1, 0, &[]).await);

        let oversized = vec![0u16; 70_000];
        let err = assert_err!(client.write_multiple_registers(1, 0, &oversized).await);
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        assert!(client.transport().sent().is_empty());
    }

    #[tokio::test]
    async fn test_write_0f_packs_and_checks_echo() {
        let transport = ScriptedTransport::replying(Ok(echo_response(ModbusFunction::WriteMultipleCoils, 2, 3)));
        let mut client = GenericModbusClient::new(transport);
        assert_ok!(client.write_multiple_coils(1, 2, &[true, false, true]).await);

        let request = &client.transport().sent()[0];
        assert_eq!(request.quantity, 3);
        assert_eq!(request.data, vec![0b101]);
    }

    #[tokio::test]
    async fn test_write_10_echo_mismatch() {
        let transport =
            ScriptedTransport::replying(Ok(echo_response(ModbusFunction::WriteMultipleRegisters, 1, 2)));
        let mut client = GenericModbusClient::new(transport);
        let err = assert_err!(client.write_10(1, 1, &[215]).await);
        assert!(matches!(err, ModbusError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_exception_is_propagated() {
        let mut client = GenericModbusClient::new(ScriptedTransport::replying(Err(ModbusError::exception(0x03, 0x02))));
        let err = assert_err!(client.read_holding_registers(1, 0, 69).await);
        assert!(matches!(err, ModbusError::Exception { code: 0x02, .. }));
    }

    #[tokio::test]
    async fn test_tcp_client_starts_disconnected() {
        let client = ModbusTcpClient::new(Duration::from_secs(1));
        assert!(!client.is_connected());
        assert!(client.peer().is_none());
    }
}
