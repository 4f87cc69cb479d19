//! End-to-end tests against an in-process Modbus server on 127.0.0.1.
//!
//! The server speaks either MBAP or RTU framing on a plain TCP socket and
//! answers from an in-memory register store.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use heru_modbus::transport::{encode_mbap_frame, encode_rtu_frame};
use heru_modbus::{
    ConnectParams, Framing, ModbusClient, ModbusError, ModbusTcpClient, PollerConfig,
    PollingClient, RegisterMap,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const STORE_SIZE: usize = 100;
const UNIT_ID: u8 = 1;

struct Store {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    input_registers: Vec<u16>,
    holding_registers: Vec<u16>,
    /// Delay applied once, before answering the next request
    stall_next: Option<Duration>,
}

impl Store {
    fn new() -> Self {
        Self {
            coils: vec![false; STORE_SIZE],
            discrete_inputs: (0..STORE_SIZE).map(|i| i % 3 == 0).collect(),
            input_registers: (0..STORE_SIZE as u16).map(|i| i * 10).collect(),
            holding_registers: vec![0; STORE_SIZE],
            stall_next: None,
        }
    }
}

type SharedStore = Arc<Mutex<Store>>;

fn exception(function: u8, code: u8) -> Vec<u8> {
    vec![function | 0x80, code]
}

fn read_bits(function: u8, bits: &[bool], address: usize, quantity: usize) -> Vec<u8> {
    if address + quantity > bits.len() {
        return exception(function, 0x02);
    }
    let mut packed = vec![0u8; quantity.div_ceil(8)];
    for (i, &bit) in bits[address..address + quantity].iter().enumerate() {
        if bit {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    let mut reply = vec![function, packed.len() as u8];
    reply.extend(packed);
    reply
}

fn read_words(function: u8, words: &[u16], address: usize, quantity: usize) -> Vec<u8> {
    if address + quantity > words.len() {
        return exception(function, 0x02);
    }
    let mut reply = vec![function, (quantity * 2) as u8];
    for word in &words[address..address + quantity] {
        reply.extend(word.to_be_bytes());
    }
    reply
}

fn respond(store: &SharedStore, pdu: &[u8]) -> Vec<u8> {
    let function = pdu[0];
    let address = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
    let quantity = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
    let mut store = store.lock().unwrap();

    match function {
        0x01 => read_bits(function, &store.coils, address, quantity),
        0x02 => read_bits(function, &store.discrete_inputs, address, quantity),
        0x03 => read_words(function, &store.holding_registers, address, quantity),
        0x04 => read_words(function, &store.input_registers, address, quantity),
        0x0F => {
            if address + quantity > STORE_SIZE {
                return exception(function, 0x02);
            }
            let data = &pdu[6..];
            for i in 0..quantity {
                store.coils[address + i] = data[i / 8] & (1 << (i % 8)) != 0;
            }
            pdu[..5].to_vec()
        }
        0x10 => {
            if address + quantity > STORE_SIZE {
                return exception(function, 0x02);
            }
            for (i, chunk) in pdu[6..].chunks(2).take(quantity).enumerate() {
                store.holding_registers[address + i] = u16::from_be_bytes([chunk[0], chunk[1]]);
            }
            pdu[..5].to_vec()
        }
        _ => exception(function, 0x01),
    }
}

/// Read one request and return (transaction id, unit id, PDU)
async fn read_request(socket: &mut TcpStream, framing: Framing) -> std::io::Result<(u16, u8, Vec<u8>)> {
    match framing {
        Framing::Tcp => {
            let mut header = [0u8; 7];
            socket.read_exact(&mut header).await?;
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let mut pdu = vec![0u8; length - 1];
            socket.read_exact(&mut pdu).await?;
            Ok((u16::from_be_bytes([header[0], header[1]]), header[6], pdu))
        }
        Framing::Rtu => {
            let mut head = [0u8; 6];
            socket.read_exact(&mut head).await?;
            let mut pdu = head[1..].to_vec();
            if matches!(head[1], 0x0F | 0x10) {
                let mut byte_count = [0u8; 1];
                socket.read_exact(&mut byte_count).await?;
                let mut data = vec![0u8; byte_count[0] as usize];
                socket.read_exact(&mut data).await?;
                pdu.push(byte_count[0]);
                pdu.extend(data);
            }
            let mut crc = [0u8; 2];
            socket.read_exact(&mut crc).await?;
            let expected = encode_rtu_frame(head[0], &pdu);
            assert_eq!(&expected[expected.len() - 2..], &crc, "request CRC");
            Ok((0, head[0], pdu))
        }
    }
}

async fn serve_connection(mut socket: TcpStream, store: SharedStore, framing: Framing) -> std::io::Result<()> {
    loop {
        let (tid, unit_id, pdu) = read_request(&mut socket, framing).await?;
        let stall = store.lock().unwrap().stall_next.take();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let reply = respond(&store, &pdu);
        let frame = match framing {
            Framing::Tcp => encode_mbap_frame(tid, unit_id, &reply),
            Framing::Rtu => encode_rtu_frame(unit_id, &reply),
        };
        socket.write_all(&frame).await?;
    }
}

async fn spawn_server(framing: Framing) -> (ConnectParams, SharedStore) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let store: SharedStore = Arc::new(Mutex::new(Store::new()));

    let server_store = Arc::clone(&store);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_connection(socket, Arc::clone(&server_store), framing));
        }
    });

    let params = ConnectParams::new("127.0.0.1", port).with_tcp(framing == Framing::Tcp);
    (params, store)
}

async fn exercise_client(framing: Framing) {
    let (params, store) = spawn_server(framing).await;
    let mut client = ModbusTcpClient::new(Duration::from_secs(2));
    client.connect(&params).await.unwrap();
    assert!(client.is_connected());

    let inputs = client.read_input_registers(UNIT_ID, 1, 4).await.unwrap();
    assert_eq!(inputs, vec![10, 20, 30, 40]);

    let discrete = client.read_discrete_inputs(UNIT_ID, 9, 5).await.unwrap();
    assert_eq!(discrete, vec![true, false, false, true, false]);

    client
        .write_multiple_registers(UNIT_ID, 1, &[215, 0xFFEC])
        .await
        .unwrap();
    assert_eq!(store.lock().unwrap().holding_registers[1..3], [215, 0xFFEC]);
    let holding = client.read_holding_registers(UNIT_ID, 0, 3).await.unwrap();
    assert_eq!(holding, vec![0, 215, 0xFFEC]);

    let pattern = [true, false, true, true, false, false, true, false, true];
    client.write_multiple_coils(UNIT_ID, 3, &pattern).await.unwrap();
    let coils = client.read_coils(UNIT_ID, 3, 9).await.unwrap();
    assert_eq!(coils, pattern);

    let stats = client.get_stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.requests_sent, 6);
    assert_eq!(stats.errors, 0);

    client.close().await.unwrap();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_client_over_mbap() {
    exercise_client(Framing::Tcp).await;
}

#[tokio::test]
async fn test_client_over_rtu_socket() {
    exercise_client(Framing::Rtu).await;
}

#[tokio::test]
async fn test_exception_keeps_session_open() {
    for framing in [Framing::Tcp, Framing::Rtu] {
        let (params, _store) = spawn_server(framing).await;
        let mut client = ModbusTcpClient::new(Duration::from_secs(2));
        client.connect(&params).await.unwrap();

        let err = client.read_holding_registers(UNIT_ID, 95, 10).await.unwrap_err();
        assert!(matches!(err, ModbusError::Exception { code: 0x02, .. }), "{:?}", err);
        assert!(client.is_connected());

        let values = client.read_input_registers(UNIT_ID, 0, 2).await.unwrap();
        assert_eq!(values, vec![0, 10]);
    }
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client = ModbusTcpClient::new(Duration::from_secs(2));
    let result = client.connect(&ConnectParams::new("127.0.0.1", port)).await;
    assert!(result.is_err());
    assert!(!client.is_connected());
}

async fn poll_against_server(framing: Framing) {
    let (params, store) = spawn_server(framing).await;
    let map = RegisterMap::gen3();
    let config = PollerConfig::new(map.clone(), params).with_poll_interval_ms(200);
    let client = PollingClient::over_tcp(config).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_result(move |result| {
        let _ = tx.send(result.clone());
    });

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.input_register(&map, "OUTDOOR_TEMPERATURE"), Some(10));
    assert_eq!(first.discrete_input(&map, "FIRE_ALARM"), Some(true));
    assert_eq!(first.holding_register(&map, "SETPOINT_TEMPERATURE"), Some(0));
    assert!(client.is_available());

    client.queue_register(1, 210);
    client.queue_coil(0, true);

    let updated = timeout(Duration::from_secs(5), async {
        while let Some(result) = rx.recv().await {
            if result.holding_register(&map, "SETPOINT_TEMPERATURE") == Some(210) {
                return result;
            }
        }
        panic!("result channel closed");
    })
    .await
    .unwrap();
    assert_eq!(updated.coil(&map, "UNIT_ON"), Some(true));

    {
        let store = store.lock().unwrap();
        assert_eq!(store.holding_registers[1], 210);
        assert!(store.coils[0]);
    }
    assert_eq!(client.stats().writes_failed, 0);

    client.destroy().await;
}

#[tokio::test]
async fn test_polling_over_mbap() {
    poll_against_server(Framing::Tcp).await;
}

#[tokio::test]
async fn test_polling_over_rtu_socket() {
    poll_against_server(Framing::Rtu).await;
}

async fn poll_through_late_reply(framing: Framing) {
    let (params, store) = spawn_server(framing).await;
    // 200ms interval gives a 100ms read deadline; the first reply misses it
    store.lock().unwrap().stall_next = Some(Duration::from_millis(150));

    let map = RegisterMap::gen3();
    let config = PollerConfig::new(map.clone(), params).with_poll_interval_ms(200);
    let started = Instant::now();
    let client = PollingClient::over_tcp(config).unwrap();

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reasons);
    client.on_unavailable(move |reason| sink.lock().unwrap().push(reason.to_string()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_result(move |result| {
        let _ = tx.send(result.clone());
    });

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(1000),
        "polling resumed after {:?}",
        started.elapsed()
    );
    assert_eq!(first.input_register(&map, "OUTDOOR_TEMPERATURE"), Some(10));
    assert!(client.is_available());

    let reasons = reasons.lock().unwrap().clone();
    assert_eq!(reasons.len(), 1, "{:?}", reasons);
    assert!(reasons[0].ends_with("\"Modbus timeout after 100ms\""), "{}", reasons[0]);

    let stats = client.stats();
    assert_eq!(stats.failed_reads, 1);
    assert_eq!(stats.reconnects, 0);

    client.destroy().await;
}

#[tokio::test]
async fn test_polling_resumes_after_late_reply_over_mbap() {
    poll_through_late_reply(Framing::Tcp).await;
}

#[tokio::test]
async fn test_polling_resumes_after_late_reply_over_rtu_socket() {
    poll_through_late_reply(Framing::Rtu).await;
}
