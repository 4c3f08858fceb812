//! UART-TTL passthrough driver.
//!
//! Forwards a command line (e.g. G-code for a 3D-printer board) to an
//! auxiliary UART and optionally collects the peripheral's one-line reply,
//! either by spinning until the line arrives (bounded by
//! `uart_read_timeout_ms`) or by returning ACK and delivering the line
//! later from [`poll_event`](Capability::poll_event).

use log::{debug, warn};

use super::{Capability, DriverContext};
use crate::app::ports::HalPort;
use crate::error::DriverError;
use crate::registry::ProfileId;
use crate::rpc::messages::{Response, UartAction, UartConfig, UartPort, UartReply};

/// Longest reply line kept, terminator excluded.
pub const RX_LINE_CAPACITY: usize = 64;

const MAX_BAUDRATE: u32 = 2_000_000;

/// Spin interval while a blocking reply is outstanding.
const BLOCKING_POLL_US: u32 = 100;

enum LineState {
    Pending,
    Complete,
    Overflow,
}

pub struct UartTtlDriver {
    profile_id: ProfileId,
    port: UartPort,
    line: heapless::Vec<u8, RX_LINE_CAPACITY>,
    listening: bool,
}

impl UartTtlDriver {
    /// Feed one received byte into the line buffer.
    fn accept(&mut self, byte: u8) -> LineState {
        match byte {
            b'\n' => LineState::Complete,
            b'\r' => LineState::Pending,
            other => match self.line.push(other) {
                Ok(()) => LineState::Pending,
                Err(_) => LineState::Overflow,
            },
        }
    }

    /// Drain whatever the port holds, stopping at the first line end.
    fn drain(&mut self, hal: &mut dyn HalPort) -> LineState {
        while let Some(byte) = hal.serial_read(self.port) {
            match self.accept(byte) {
                LineState::Pending => {}
                done => return done,
            }
        }
        LineState::Pending
    }

    fn finish(&mut self, state: LineState, ctx: &DriverContext<'_>) -> Response {
        let response = match state {
            LineState::Complete => ctx.data(&self.line),
            LineState::Overflow => {
                warn!(
                    "UART[{}]: reply exceeded {} bytes",
                    self.profile_id, RX_LINE_CAPACITY
                );
                ctx.fail(DriverError::BufferOverflow)
            }
            LineState::Pending => ctx.fail(DriverError::TimedOut),
        };
        self.line.clear();
        response
    }

    fn discard_stale(&mut self, hal: &mut dyn HalPort) {
        let mut dropped = 0usize;
        while hal.serial_read(self.port).is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("UART[{}]: dropped {} stale bytes", self.profile_id, dropped);
        }
        self.line.clear();
    }
}

impl Capability for UartTtlDriver {
    type Config = UartConfig;
    type Params = UartAction;

    fn init(
        profile_id: ProfileId,
        config: &UartConfig,
        hal: &mut dyn HalPort,
    ) -> Result<Self, DriverError> {
        if config.baudrate == 0 {
            return Err(DriverError::InvalidConfig("baudrate must be non-zero"));
        }
        if config.baudrate > MAX_BAUDRATE {
            return Err(DriverError::InvalidConfig("baudrate above 2 Mbaud"));
        }
        hal.serial_begin(config.port, config.baudrate)?;
        debug!(
            "UART[{}]: {:?} open at {} baud",
            profile_id, config.port, config.baudrate
        );
        Ok(Self {
            profile_id,
            port: config.port,
            line: heapless::Vec::new(),
            listening: false,
        })
    }

    fn action(&mut self, params: &UartAction, ctx: &mut DriverContext<'_>) -> Response {
        self.listening = false;
        self.discard_stale(ctx.hal);

        ctx.hal.serial_write(self.port, params.command.as_bytes());
        ctx.hal.serial_write(self.port, b"\n");

        match params.reply {
            UartReply::Ignore => ctx.done(),
            UartReply::Blocking => {
                let timeout = u64::from(ctx.settings().uart_read_timeout_ms);
                let deadline = ctx.hal.millis().saturating_add(timeout);
                loop {
                    let state = self.drain(ctx.hal);
                    if !matches!(state, LineState::Pending) {
                        return self.finish(state, ctx);
                    }
                    if ctx.hal.millis() >= deadline {
                        warn!(
                            "UART[{}]: no reply within {} ms",
                            self.profile_id, timeout
                        );
                        return self.finish(LineState::Pending, ctx);
                    }
                    ctx.hal.delay_us(BLOCKING_POLL_US);
                }
            }
            UartReply::Event => {
                self.listening = true;
                ctx.arm_event();
                ctx.ack()
            }
        }
    }

    fn poll_event(&mut self, ctx: &mut DriverContext<'_>) -> Option<Response> {
        if !self.listening || ctx.hal.serial_available(self.port) == 0 {
            return None;
        }
        match self.drain(ctx.hal) {
            LineState::Pending => None,
            done => {
                self.listening = false;
                Some(self.finish(done, ctx))
            }
        }
    }

    fn release(&mut self, hal: &mut dyn HalPort) {
        self.listening = false;
        self.line.clear();
        hal.serial_end(self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DriverSettings;
    use crate::drivers::testing::MockHal;
    use crate::rpc::messages::ResponseCode;

    const PORT: UartPort = UartPort::Uart2;

    fn driver(hal: &mut MockHal) -> UartTtlDriver {
        UartTtlDriver::init(
            ProfileId::new(4),
            &UartConfig {
                port: PORT,
                baudrate: 115_200,
            },
            hal,
        )
        .unwrap()
    }

    fn command(text: &str, reply: UartReply) -> UartAction {
        UartAction {
            command: heapless::String::try_from(text).unwrap(),
            reply,
        }
    }

    #[test]
    fn zero_baudrate_is_rejected() {
        let mut hal = MockHal::default();
        let err = UartTtlDriver::init(
            ProfileId::new(4),
            &UartConfig {
                port: PORT,
                baudrate: 0,
            },
            &mut hal,
        )
        .err();
        assert!(matches!(err, Some(DriverError::InvalidConfig(_))));
        assert!(hal.open_ports.is_empty());
    }

    #[test]
    fn ignore_writes_line_and_returns_done() {
        let mut hal = MockHal::default();
        let settings = DriverSettings::default();
        let mut d = driver(&mut hal);
        let mut ctx = DriverContext::new(ProfileId::new(4), &mut hal, &settings);
        let resp = d.action(&command("G28", UartReply::Ignore), &mut ctx);
        assert_eq!(resp.code, ResponseCode::Done);
        assert_eq!(hal.sent(PORT), b"G28\n");
    }

    #[test]
    fn blocking_returns_reply_line() {
        let mut hal = MockHal::default();
        let settings = DriverSettings::default();
        let mut d = driver(&mut hal);
        hal.reply.insert(PORT, b"ok\r\n".to_vec());
        let mut ctx = DriverContext::new(ProfileId::new(4), &mut hal, &settings);
        let resp = d.action(&command("M114", UartReply::Blocking), &mut ctx);
        assert_eq!(resp.code, ResponseCode::Data);
        assert_eq!(resp.payload_bytes(), b"ok");
    }

    #[test]
    fn blocking_times_out_without_reply() {
        let mut hal = MockHal::default();
        let settings = DriverSettings {
            uart_read_timeout_ms: 5,
            ..Default::default()
        };
        let mut d = driver(&mut hal);
        let mut ctx = DriverContext::new(ProfileId::new(4), &mut hal, &settings);
        let resp = d.action(&command("M114", UartReply::Blocking), &mut ctx);
        assert_eq!(resp.code, ResponseCode::Error);
        let text = core::str::from_utf8(resp.payload_bytes()).unwrap();
        assert!(text.contains("timed out"), "got {text:?}");
        assert!(hal.millis() >= 5);
    }

    #[test]
    fn overlong_reply_overflows() {
        let mut hal = MockHal::default();
        let settings = DriverSettings::default();
        let mut d = driver(&mut hal);
        hal.reply.insert(PORT, vec![b'x'; RX_LINE_CAPACITY + 8]);
        let mut ctx = DriverContext::new(ProfileId::new(4), &mut hal, &settings);
        let resp = d.action(&command("M503", UartReply::Blocking), &mut ctx);
        assert_eq!(resp.code, ResponseCode::Error);
        let text = core::str::from_utf8(resp.payload_bytes()).unwrap();
        assert!(text.contains("overflow"), "got {text:?}");
    }

    #[test]
    fn event_reply_is_assembled_across_polls() {
        let mut hal = MockHal::default();
        let settings = DriverSettings::default();
        let mut d = driver(&mut hal);

        let mut ctx = DriverContext::new(ProfileId::new(4), &mut hal, &settings);
        let resp = d.action(&command("G1 X10", UartReply::Event), &mut ctx);
        assert_eq!(resp.code, ResponseCode::Ack);
        assert!(ctx.arm_requested());

        hal.feed(PORT, b"o");
        let mut ctx = DriverContext::new(ProfileId::new(4), &mut hal, &settings);
        assert!(d.poll_event(&mut ctx).is_none());

        hal.feed(PORT, b"k\n");
        let mut ctx = DriverContext::new(ProfileId::new(4), &mut hal, &settings);
        let fired = d.poll_event(&mut ctx).unwrap();
        assert_eq!(fired.payload_bytes(), b"ok");
        assert!(d.poll_event(&mut ctx).is_none());
    }

    #[test]
    fn stale_input_is_discarded_before_command() {
        let mut hal = MockHal::default();
        let settings = DriverSettings::default();
        let mut d = driver(&mut hal);
        hal.feed(PORT, b"old\n");
        hal.reply.insert(PORT, b"new\n".to_vec());
        let mut ctx = DriverContext::new(ProfileId::new(4), &mut hal, &settings);
        let resp = d.action(&command("M115", UartReply::Blocking), &mut ctx);
        assert_eq!(resp.payload_bytes(), b"new");
    }

    #[test]
    fn release_closes_port() {
        let mut hal = MockHal::default();
        let mut d = driver(&mut hal);
        assert_eq!(hal.open_ports.len(), 1);
        d.release(&mut hal);
        assert!(hal.open_ports.is_empty());
    }
}
