//! Gateway link transports.
//!
//! - **`target_os = "espidf"`**: [`Uart0Transport`] drives the USB-serial
//!   bridge on UART0 through the ESP-IDF UART driver.  Reads never block.
//! - **all other targets**: [`StdioTransport`] speaks the same framed
//!   protocol over stdin/stdout so the simulation binary can sit at the
//!   end of a pipe.  A reader thread drains stdin into a shared queue.

use core::fmt;

use log::info;

use crate::rpc::transport::Transport;

#[cfg(not(target_os = "espidf"))]
use std::collections::VecDeque;
#[cfg(not(target_os = "espidf"))]
use std::io::{Read, Write};
#[cfg(not(target_os = "espidf"))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(not(target_os = "espidf"))]
use std::sync::{Arc, Mutex};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    /// The underlying driver refused the operation.
    Io,
    /// The other end went away.
    Closed,
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "serial I/O error"),
            Self::Closed => write!(f, "serial link closed"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// UART0 (device)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
const RX_BUF_SIZE: i32 = 1024;
#[cfg(target_os = "espidf")]
const TX_BUF_SIZE: i32 = 1024;
#[cfg(target_os = "espidf")]
const FLUSH_TIMEOUT_TICKS: u32 = 100;

#[cfg(target_os = "espidf")]
pub struct Uart0Transport {
    port: uart_port_t,
}

#[cfg(target_os = "espidf")]
impl Uart0Transport {
    /// Install the UART0 driver at `baud_rate`, 8N1, default pins.
    pub fn new(baud_rate: u32) -> Result<Self, SerialError> {
        let port = uart_port_t_UART_NUM_0;
        let cfg = uart_config_t {
            baud_rate: baud_rate as i32,
            data_bits: uart_word_length_t_UART_DATA_8_BITS,
            parity: uart_parity_t_UART_PARITY_DISABLE,
            stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
            flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
            ..Default::default()
        };
        // SAFETY: called once from the main task before the scheduler
        // starts; UART0 is not used by anything else afterwards.
        unsafe {
            if uart_driver_install(port, RX_BUF_SIZE, TX_BUF_SIZE, 0, core::ptr::null_mut(), 0)
                != ESP_OK as i32
            {
                return Err(SerialError::Io);
            }
            if uart_param_config(port, &cfg) != ESP_OK as i32 {
                uart_driver_delete(port);
                return Err(SerialError::Io);
            }
        }
        info!("UART0 transport: {} baud", baud_rate);
        Ok(Self { port })
    }
}

#[cfg(target_os = "espidf")]
impl Transport for Uart0Transport {
    type Error = SerialError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        // SAFETY: buf is valid for buf.len() bytes; zero ticks = no wait.
        let n = unsafe { uart_read_bytes(self.port, buf.as_mut_ptr().cast(), buf.len() as u32, 0) };
        if n < 0 {
            return Err(SerialError::Io);
        }
        Ok(n as usize)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        // SAFETY: data outlives the call; the driver copies into its ring.
        let n = unsafe { uart_write_bytes(self.port, data.as_ptr().cast(), data.len()) };
        if n < 0 {
            return Err(SerialError::Io);
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        // SAFETY: driver installed in new().
        let ret = unsafe { uart_wait_tx_done(self.port, FLUSH_TIMEOUT_TICKS) };
        if ret == ESP_OK as i32 { Ok(()) } else { Err(SerialError::Io) }
    }

    fn available(&self) -> bool {
        let mut len: usize = 0;
        // SAFETY: len is a valid out-pointer.
        unsafe {
            uart_get_buffered_data_len(self.port, &mut len);
        }
        len > 0
    }
}

// ───────────────────────────────────────────────────────────────
// stdin / stdout (host simulation)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub struct StdioTransport {
    rx: Arc<Mutex<VecDeque<u8>>>,
    eof: Arc<AtomicBool>,
    out: std::io::Stdout,
}

#[cfg(not(target_os = "espidf"))]
impl StdioTransport {
    /// Spawn the stdin reader thread.
    pub fn new() -> std::io::Result<Self> {
        let rx = Arc::new(Mutex::new(VecDeque::new()));
        let eof = Arc::new(AtomicBool::new(false));

        let queue = Arc::clone(&rx);
        let done = Arc::clone(&eof);
        std::thread::Builder::new()
            .name("stdin-reader".into())
            .spawn(move || {
                let mut stdin = std::io::stdin().lock();
                let mut chunk = [0u8; 256];
                loop {
                    match stdin.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if let Ok(mut q) = queue.lock() {
                                q.extend(&chunk[..n]);
                            }
                        }
                    }
                }
                done.store(true, Ordering::Release);
            })?;

        info!("stdio transport: reading frames from stdin");
        Ok(Self {
            rx,
            eof,
            out: std::io::stdout(),
        })
    }

    /// stdin hit end-of-file and every byte has been consumed.
    pub fn is_closed(&self) -> bool {
        self.eof.load(Ordering::Acquire) && !self.available()
    }
}

#[cfg(not(target_os = "espidf"))]
impl Transport for StdioTransport {
    type Error = SerialError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let mut q = self.rx.lock().map_err(|_| SerialError::Io)?;
        let n = buf.len().min(q.len());
        for (slot, byte) in buf.iter_mut().zip(q.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        self.out.write(data).map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => SerialError::Closed,
            _ => SerialError::Io,
        })
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        self.out.flush().map_err(|_| SerialError::Io)
    }

    fn available(&self) -> bool {
        self.rx.lock().is_ok_and(|q| !q.is_empty())
    }
}
