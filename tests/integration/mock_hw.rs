//! Mock adapters for integration tests.
//!
//! Every port the controller touches is replaced by an in-memory double
//! with a virtual clock, so full request → driver → response cycles run on
//! the host in microseconds.

use std::collections::{HashMap, VecDeque};

use embedded_hal::digital::PinState;
use periph_bridge::adapters::nvs::NvsProfileStore;
use periph_bridge::app::ports::{HalError, HalPort, StorageError, StoragePort};
use periph_bridge::config::ControllerConfig;
use periph_bridge::rpc::codec::{FRAME_BUF_SIZE, FrameDecoder, decode_response, encode_request};
use periph_bridge::rpc::messages::{PinMode, Request, Response, UartPort};
use periph_bridge::rpc::transport::Transport;
use periph_bridge::scheduler::{Controller, TickOutcome};

// ── MockHal ───────────────────────────────────────────────────

#[derive(Default)]
#[allow(dead_code)]
pub struct MockHal {
    pub modes: HashMap<u8, PinMode>,
    pub levels: HashMap<u8, PinState>,
    pub open_ports: HashMap<UartPort, u32>,
    pub uart_tx: HashMap<UartPort, Vec<u8>>,
    pub uart_rx: HashMap<UartPort, VecDeque<u8>>,
    /// Delivered on the next write to the port.
    pub uart_reply: HashMap<UartPort, Vec<u8>>,
    pub echo_us: Option<u32>,
    pub color: Option<[u16; 3]>,
    pub pwm: HashMap<u8, u32>,
    pub now_us: u64,
    pub free: u32,
}

#[allow(dead_code)]
impl MockHal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self, port: UartPort) -> &[u8] {
        self.uart_tx.get(&port).map_or(&[], Vec::as_slice)
    }

    pub fn set_level(&mut self, pin: u8, state: PinState) {
        self.levels.insert(pin, state);
    }

    pub fn level(&self, pin: u8) -> Option<PinState> {
        self.levels.get(&pin).copied()
    }
}

impl HalPort for MockHal {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), HalError> {
        if pin > 39 {
            return Err(HalError::UnsupportedPin(pin));
        }
        self.modes.insert(pin, mode);
        Ok(())
    }

    fn digital_write(&mut self, pin: u8, state: PinState) {
        self.levels.insert(pin, state);
    }

    fn digital_read(&mut self, pin: u8) -> PinState {
        self.levels.get(&pin).copied().unwrap_or(PinState::Low)
    }

    fn serial_begin(&mut self, port: UartPort, baudrate: u32) -> Result<(), HalError> {
        self.open_ports.insert(port, baudrate);
        Ok(())
    }

    fn serial_end(&mut self, port: UartPort) {
        self.open_ports.remove(&port);
    }

    fn serial_write(&mut self, port: UartPort, data: &[u8]) -> usize {
        self.uart_tx.entry(port).or_default().extend_from_slice(data);
        if let Some(reply) = self.uart_reply.remove(&port) {
            self.uart_rx.entry(port).or_default().extend(reply);
        }
        data.len()
    }

    fn serial_read(&mut self, port: UartPort) -> Option<u8> {
        self.uart_rx.get_mut(&port).and_then(VecDeque::pop_front)
    }

    fn serial_available(&self, port: UartPort) -> usize {
        self.uart_rx.get(&port).map_or(0, VecDeque::len)
    }

    fn pulse_in(&mut self, _pin: u8, _state: PinState, timeout_us: u32) -> Option<u32> {
        self.echo_us.filter(|&us| us <= timeout_us)
    }

    fn color_sensor_begin(&mut self, _integration_time_ms: u16, _gain: u8) -> Result<(), HalError> {
        self.color.map(|_| ()).ok_or(HalError::NoDevice)
    }

    fn color_sensor_read(&mut self) -> Result<[u16; 3], HalError> {
        self.color.ok_or(HalError::NoDevice)
    }

    fn step_pwm(&mut self, pin: u8, frequency_hz: u32) {
        self.pwm.insert(pin, frequency_hz);
    }

    fn delay_us(&mut self, us: u32) {
        self.now_us += u64::from(us);
    }

    fn millis(&self) -> u64 {
        self.now_us / 1000
    }

    fn free_memory(&self) -> u32 {
        self.free
    }
}

// ── MockTransport ─────────────────────────────────────────────

#[derive(Default)]
pub struct MockTransport {
    pub inbound: VecDeque<u8>,
    pub outbound: Vec<u8>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn push_request(&mut self, request: &Request) {
        let mut buf = [0u8; FRAME_BUF_SIZE];
        let n = encode_request(request, &mut buf).expect("request fits a frame");
        self.inbound.extend(&buf[..n]);
    }

    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Decode and drain everything the controller has sent.
    pub fn take_responses(&mut self) -> Vec<Response> {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for &b in &self.outbound {
            if let Some(payload) = decoder.push(b).expect("controller sends valid frames") {
                out.push(decode_response(payload).expect("controller sends valid responses"));
            }
        }
        assert!(decoder.is_idle(), "controller left a partial frame");
        self.outbound.clear();
        out
    }
}

impl Transport for MockTransport {
    type Error = ();

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ()> {
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        self.outbound.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn available(&self) -> bool {
        !self.inbound.is_empty()
    }
}

// ── MockStore ─────────────────────────────────────────────────

/// Cloneable key-value store; cloning simulates the flash surviving a reboot.
#[derive(Default, Clone)]
pub struct MockStore {
    pub data: HashMap<(String, String), Vec<u8>>,
    pub fail_writes: bool,
}

impl StoragePort for MockStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self
            .data
            .get(&(namespace.to_owned(), key.to_owned()))
            .ok_or(StorageError::NotFound)?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Full);
        }
        self.data
            .insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.data.remove(&(namespace.to_owned(), key.to_owned()));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.data
            .contains_key(&(namespace.to_owned(), key.to_owned()))
    }
}

// ── Controller harness ────────────────────────────────────────

pub type TestController = Controller<MockTransport, MockHal, NvsProfileStore<MockStore>>;

#[allow(dead_code)]
pub fn controller() -> TestController {
    controller_with(ControllerConfig::default(), MockStore::default())
}

pub fn controller_with(config: ControllerConfig, store: MockStore) -> TestController {
    Controller::new(
        config,
        MockTransport::default(),
        MockHal::new(),
        NvsProfileStore::new(store),
    )
}

/// Send one request and collect every response up to the next idle tick.
#[allow(dead_code)]
pub fn exchange(ctrl: &mut TestController, request: &Request) -> Vec<Response> {
    ctrl.transport_mut().push_request(request);
    run_until_idle(ctrl)
}

/// Tick until nothing is left to do (bounded).
pub fn run_until_idle(ctrl: &mut TestController) -> Vec<Response> {
    for _ in 0..1000 {
        if ctrl.tick() == TickOutcome::Idle {
            break;
        }
    }
    ctrl.transport_mut().take_responses()
}

/// The persisted flash contents, for a simulated reboot.
#[allow(dead_code)]
pub fn flash(ctrl: &TestController) -> MockStore {
    ctrl.persistence().storage().clone()
}
