//! Board adapter, the only module that touches real peripherals.
//!
//! Implements [`HalPort`] for the controller board.  On `espidf` targets
//! every call goes straight to the ESP-IDF C API (GPIO matrix, UART driver,
//! LEDC, legacy I²C master).  On the host the same type is backed by an
//! in-memory board so the simulation binary and the adapter tests share one
//! code path:
//!
//! - auxiliary UARTs loop TX back into RX,
//! - input pins read whatever [`BoardHal::set_input`] last injected,
//! - ranger echoes come from [`BoardHal::set_echo`],
//! - the RGB sensor answers with [`BoardHal::set_color`] samples.

use embedded_hal::digital::PinState;
use log::{debug, info};

use crate::app::ports::{HalError, HalPort};
use crate::rpc::messages::{PinMode, UartPort};

#[cfg(not(target_os = "espidf"))]
use std::collections::{HashMap, VecDeque};

#[cfg(target_os = "espidf")]
use crate::drivers::{COLOR_BUS_PINS, UART2_PINS};
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

/// Highest GPIO number on the module.
pub const MAX_GPIO: u8 = 39;

/// GPIOs 34..=39 have no output driver.
const FIRST_INPUT_ONLY_GPIO: u8 = 34;

/// Flash/PSRAM lines and the gateway UART0 pins.
const RESERVED_GPIOS: [u8; 8] = [1, 3, 6, 7, 8, 9, 10, 11];

/// Numbers the GPIO matrix skips.
const MISSING_GPIOS: [u8; 5] = [20, 24, 28, 29, 30];

/// Check that `pin` exists, is free for profiles and supports `mode`.
pub fn check_pin(pin: u8, mode: PinMode) -> Result<(), HalError> {
    if pin > MAX_GPIO
        || pin == 31
        || RESERVED_GPIOS.contains(&pin)
        || MISSING_GPIOS.contains(&pin)
    {
        return Err(HalError::UnsupportedPin(pin));
    }
    if mode == PinMode::Output && pin >= FIRST_INPUT_ONLY_GPIO {
        return Err(HalError::UnsupportedPin(pin));
    }
    Ok(())
}

// ── TCS34725 register map ─────────────────────────────────────

#[cfg(target_os = "espidf")]
mod tcs {
    pub const ADDR: u8 = 0x29;
    pub const CMD: u8 = 0x80;
    pub const CMD_AUTO_INC: u8 = 0xA0;
    pub const REG_ENABLE: u8 = 0x00;
    pub const REG_ATIME: u8 = 0x01;
    pub const REG_CONTROL: u8 = 0x0F;
    pub const REG_ID: u8 = 0x12;
    pub const REG_RDATAL: u8 = 0x16;
    pub const ENABLE_PON: u8 = 0x01;
    pub const ENABLE_AEN: u8 = 0x02;
    pub const IDS: [u8; 2] = [0x44, 0x4D];
    pub const SDA_GPIO: i32 = super::COLOR_BUS_PINS[0] as i32;
    pub const SCL_GPIO: i32 = super::COLOR_BUS_PINS[1] as i32;
    pub const I2C_HZ: u32 = 100_000;
    pub const TIMEOUT_TICKS: u32 = 10;
}

/// Gain register value for the analog gains the sensor supports.
fn gain_code(gain: u8) -> Option<u8> {
    match gain {
        1 => Some(0),
        4 => Some(1),
        16 => Some(2),
        60 => Some(3),
        _ => None,
    }
}

/// ATIME register value: 2.4 ms per integration cycle, 256 cycles max.
fn atime_code(integration_time_ms: u16) -> u8 {
    let cycles = (u32::from(integration_time_ms) * 10 / 24).clamp(1, 256);
    (256 - cycles) as u8
}

// ── Simulated board ───────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimBoard {
    modes: HashMap<u8, PinMode>,
    /// Output latch for output pins, injected level for inputs.
    levels: HashMap<u8, PinState>,
    uarts: HashMap<UartPort, VecDeque<u8>>,
    echoes: HashMap<u8, u32>,
    color_sample: Option<[u16; 3]>,
    color_enabled: bool,
    pwm: HashMap<u8, u32>,
}

/// Concrete [`HalPort`] for the controller board.
pub struct BoardHal {
    #[cfg(not(target_os = "espidf"))]
    sim: SimBoard,
    #[cfg(not(target_os = "espidf"))]
    boot: std::time::Instant,
    #[cfg(target_os = "espidf")]
    open_uarts: [bool; 2],
    #[cfg(target_os = "espidf")]
    i2c_ready: bool,
    #[cfg(target_os = "espidf")]
    pwm_pin: Option<u8>,
}

impl Default for BoardHal {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardHal {
    pub fn new() -> Self {
        #[cfg(target_os = "espidf")]
        info!("BoardHal: ESP-IDF peripherals");
        #[cfg(not(target_os = "espidf"))]
        info!("BoardHal: simulation backend");

        Self {
            #[cfg(not(target_os = "espidf"))]
            sim: SimBoard::default(),
            #[cfg(not(target_os = "espidf"))]
            boot: std::time::Instant::now(),
            #[cfg(target_os = "espidf")]
            open_uarts: [false; 2],
            #[cfg(target_os = "espidf")]
            i2c_ready: false,
            #[cfg(target_os = "espidf")]
            pwm_pin: None,
        }
    }
}

// ── Simulation hooks ──────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl BoardHal {
    /// Drive an input pin from outside the board.
    pub fn set_input(&mut self, pin: u8, state: PinState) {
        self.sim.levels.insert(pin, state);
    }

    /// Make the ranger on `pin` report an echo of `us` microseconds.
    pub fn set_echo(&mut self, pin: u8, us: u32) {
        self.sim.echoes.insert(pin, us);
    }

    /// Attach a simulated RGB sensor returning `sample`.
    pub fn set_color(&mut self, sample: [u16; 3]) {
        self.sim.color_sample = Some(sample);
    }

    pub fn mode_of(&self, pin: u8) -> Option<PinMode> {
        self.sim.modes.get(&pin).copied()
    }

    pub fn pwm_of(&self, pin: u8) -> u32 {
        self.sim.pwm.get(&pin).copied().unwrap_or(0)
    }

    pub fn is_open(&self, port: UartPort) -> bool {
        self.sim.uarts.contains_key(&port)
    }
}

#[cfg(not(target_os = "espidf"))]
impl HalPort for BoardHal {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), HalError> {
        check_pin(pin, mode)?;
        self.sim.modes.insert(pin, mode);
        self.sim.pwm.remove(&pin);
        if mode == PinMode::Output {
            self.sim.levels.insert(pin, PinState::Low);
        }
        debug!("Board: GPIO{} -> {:?}", pin, mode);
        Ok(())
    }

    fn digital_write(&mut self, pin: u8, state: PinState) {
        if self.sim.modes.get(&pin) == Some(&PinMode::Output) {
            self.sim.levels.insert(pin, state);
        }
    }

    fn digital_read(&mut self, pin: u8) -> PinState {
        match self.sim.levels.get(&pin) {
            Some(&state) => state,
            None if self.sim.modes.get(&pin) == Some(&PinMode::InputPullup) => PinState::High,
            None => PinState::Low,
        }
    }

    fn serial_begin(&mut self, port: UartPort, baudrate: u32) -> Result<(), HalError> {
        if baudrate == 0 {
            return Err(HalError::PortUnavailable);
        }
        self.sim.uarts.insert(port, VecDeque::new());
        debug!("Board: {:?} open at {} baud (loopback)", port, baudrate);
        Ok(())
    }

    fn serial_end(&mut self, port: UartPort) {
        self.sim.uarts.remove(&port);
    }

    fn serial_write(&mut self, port: UartPort, data: &[u8]) -> usize {
        match self.sim.uarts.get_mut(&port) {
            Some(rx) => {
                rx.extend(data.iter().copied());
                data.len()
            }
            None => 0,
        }
    }

    fn serial_read(&mut self, port: UartPort) -> Option<u8> {
        self.sim.uarts.get_mut(&port).and_then(VecDeque::pop_front)
    }

    fn serial_available(&self, port: UartPort) -> usize {
        self.sim.uarts.get(&port).map_or(0, VecDeque::len)
    }

    fn pulse_in(&mut self, pin: u8, _state: PinState, timeout_us: u32) -> Option<u32> {
        self.sim
            .echoes
            .get(&pin)
            .copied()
            .filter(|&us| us <= timeout_us)
    }

    fn color_sensor_begin(&mut self, integration_time_ms: u16, gain: u8) -> Result<(), HalError> {
        if gain_code(gain).is_none() {
            return Err(HalError::NoDevice);
        }
        if self.sim.color_sample.is_none() {
            return Err(HalError::NoDevice);
        }
        debug!(
            "Board: color sensor ATIME=0x{:02X} gain={}x",
            atime_code(integration_time_ms),
            gain
        );
        self.sim.color_enabled = true;
        Ok(())
    }

    fn color_sensor_read(&mut self) -> Result<[u16; 3], HalError> {
        if !self.sim.color_enabled {
            return Err(HalError::NoDevice);
        }
        self.sim.color_sample.ok_or(HalError::NoDevice)
    }

    fn step_pwm(&mut self, pin: u8, frequency_hz: u32) {
        if frequency_hz == 0 {
            self.sim.pwm.remove(&pin);
        } else {
            self.sim.pwm.insert(pin, frequency_hz);
        }
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(u64::from(us)));
    }

    fn millis(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    fn free_memory(&self) -> u32 {
        // Typical free heap on a fresh WROOM-32 after boot.
        200 * 1024
    }
}

// ── ESP-IDF backend ───────────────────────────────────────────

#[cfg(target_os = "espidf")]
const AUX_UART_TX_GPIO: i32 = UART2_PINS[0] as i32;
#[cfg(target_os = "espidf")]
const AUX_UART_RX_GPIO: i32 = UART2_PINS[1] as i32;
#[cfg(target_os = "espidf")]
const AUX_UART_RX_BUF: i32 = 256;

#[cfg(target_os = "espidf")]
const STEP_LEDC_TIMER: ledc_timer_t = ledc_timer_t_LEDC_TIMER_0;
#[cfg(target_os = "espidf")]
const STEP_LEDC_CHANNEL: ledc_channel_t = ledc_channel_t_LEDC_CHANNEL_0;

#[cfg(target_os = "espidf")]
impl BoardHal {
    /// Hardware UART backing each auxiliary port.  The module has three
    /// UARTs, so only `Uart2` is wired.
    fn uart_num(port: UartPort) -> Option<uart_port_t> {
        match port {
            UartPort::Uart2 => Some(uart_port_t_UART_NUM_2),
            UartPort::Uart3 => None,
        }
    }

    fn uart_slot(port: UartPort) -> usize {
        match port {
            UartPort::Uart2 => 0,
            UartPort::Uart3 => 1,
        }
    }

    fn micros() -> i64 {
        // SAFETY: esp_timer_get_time reads the free-running system timer.
        unsafe { esp_timer_get_time() }
    }

    /// Spin until `pin` reads `state`, or the deadline passes.
    fn wait_for_level(pin: u8, state: PinState, deadline_us: i64) -> bool {
        let want = i32::from(state == PinState::High);
        loop {
            // SAFETY: gpio_get_level is a register read on a configured pin.
            if unsafe { gpio_get_level(i32::from(pin)) } == want {
                return true;
            }
            if Self::micros() >= deadline_us {
                return false;
            }
        }
    }

    fn i2c_setup(&mut self) -> Result<(), HalError> {
        if self.i2c_ready {
            return Ok(());
        }
        let mut cfg = i2c_config_t {
            mode: i2c_mode_t_I2C_MODE_MASTER,
            sda_io_num: tcs::SDA_GPIO,
            scl_io_num: tcs::SCL_GPIO,
            sda_pullup_en: true,
            scl_pullup_en: true,
            ..Default::default()
        };
        cfg.__bindgen_anon_1.master.clk_speed = tcs::I2C_HZ;

        // SAFETY: I²C port 0 is owned exclusively by the color sensor and
        // configured once from the main task.
        let ret = unsafe { i2c_param_config(i2c_port_t_I2C_NUM_0, &cfg) };
        if ret != ESP_OK as i32 {
            warn!("Board: i2c_param_config failed ({})", ret);
            return Err(HalError::NoDevice);
        }
        let ret = unsafe { i2c_driver_install(i2c_port_t_I2C_NUM_0, cfg.mode, 0, 0, 0) };
        if ret != ESP_OK as i32 {
            warn!("Board: i2c_driver_install failed ({})", ret);
            return Err(HalError::NoDevice);
        }
        self.i2c_ready = true;
        Ok(())
    }

    fn tcs_write(reg: u8, value: u8) -> Result<(), HalError> {
        let buf = [tcs::CMD | reg, value];
        // SAFETY: buf outlives the blocking transaction.
        let ret = unsafe {
            i2c_master_write_to_device(
                i2c_port_t_I2C_NUM_0,
                tcs::ADDR,
                buf.as_ptr(),
                buf.len(),
                tcs::TIMEOUT_TICKS,
            )
        };
        if ret == ESP_OK as i32 { Ok(()) } else { Err(HalError::NoDevice) }
    }

    fn tcs_read(cmd: u8, out: &mut [u8]) -> Result<(), HalError> {
        let reg = [cmd];
        // SAFETY: both buffers outlive the blocking transaction.
        let ret = unsafe {
            i2c_master_write_read_device(
                i2c_port_t_I2C_NUM_0,
                tcs::ADDR,
                reg.as_ptr(),
                reg.len(),
                out.as_mut_ptr(),
                out.len(),
                tcs::TIMEOUT_TICKS,
            )
        };
        if ret == ESP_OK as i32 { Ok(()) } else { Err(HalError::NoDevice) }
    }
}

#[cfg(target_os = "espidf")]
impl HalPort for BoardHal {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), HalError> {
        check_pin(pin, mode)?;
        if self.pwm_pin == Some(pin) {
            self.step_pwm(pin, 0);
        }
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: match mode {
                PinMode::Output => gpio_mode_t_GPIO_MODE_OUTPUT,
                PinMode::Input | PinMode::InputPullup => gpio_mode_t_GPIO_MODE_INPUT,
            },
            pull_up_en: if mode == PinMode::InputPullup {
                gpio_pullup_t_GPIO_PULLUP_ENABLE
            } else {
                gpio_pullup_t_GPIO_PULLUP_DISABLE
            },
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        // SAFETY: pin was range-checked above; gpio_config only touches
        // the registers of the pins in pin_bit_mask.
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            warn!("Board: gpio_config(GPIO{}) failed ({})", pin, ret);
            return Err(HalError::UnsupportedPin(pin));
        }
        debug!("Board: GPIO{} -> {:?}", pin, mode);
        Ok(())
    }

    fn digital_write(&mut self, pin: u8, state: PinState) {
        // SAFETY: output latch write; harmless on unconfigured pins.
        unsafe {
            gpio_set_level(i32::from(pin), u32::from(state == PinState::High));
        }
    }

    fn digital_read(&mut self, pin: u8) -> PinState {
        // SAFETY: gpio_get_level is a register read.
        if unsafe { gpio_get_level(i32::from(pin)) } != 0 {
            PinState::High
        } else {
            PinState::Low
        }
    }

    fn serial_begin(&mut self, port: UartPort, baudrate: u32) -> Result<(), HalError> {
        let num = Self::uart_num(port).ok_or(HalError::PortUnavailable)?;
        if self.open_uarts[Self::uart_slot(port)] {
            self.serial_end(port);
        }
        let cfg = uart_config_t {
            baud_rate: baudrate as i32,
            data_bits: uart_word_length_t_UART_DATA_8_BITS,
            parity: uart_parity_t_UART_PARITY_DISABLE,
            stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
            flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
            ..Default::default()
        };
        // SAFETY: the auxiliary UART is only driven from the main task and
        // its driver is not installed at this point.
        unsafe {
            if uart_driver_install(num, AUX_UART_RX_BUF, 0, 0, core::ptr::null_mut(), 0) != ESP_OK as i32 {
                return Err(HalError::PortUnavailable);
            }
            if uart_param_config(num, &cfg) != ESP_OK as i32
                || uart_set_pin(num, AUX_UART_TX_GPIO, AUX_UART_RX_GPIO, -1, -1) != ESP_OK as i32
            {
                uart_driver_delete(num);
                return Err(HalError::PortUnavailable);
            }
        }
        self.open_uarts[Self::uart_slot(port)] = true;
        debug!("Board: {:?} open at {} baud", port, baudrate);
        Ok(())
    }

    fn serial_end(&mut self, port: UartPort) {
        let Some(num) = Self::uart_num(port) else {
            return;
        };
        let slot = Self::uart_slot(port);
        if self.open_uarts[slot] {
            // SAFETY: the driver was installed by serial_begin.
            unsafe {
                uart_driver_delete(num);
            }
            self.open_uarts[slot] = false;
        }
    }

    fn serial_write(&mut self, port: UartPort, data: &[u8]) -> usize {
        let Some(num) = Self::uart_num(port) else {
            return 0;
        };
        if !self.open_uarts[Self::uart_slot(port)] {
            return 0;
        }
        // SAFETY: data outlives the call; the TX path copies into the FIFO.
        let n = unsafe { uart_write_bytes(num, data.as_ptr().cast(), data.len()) };
        n.max(0) as usize
    }

    fn serial_read(&mut self, port: UartPort) -> Option<u8> {
        let num = Self::uart_num(port)?;
        if !self.open_uarts[Self::uart_slot(port)] {
            return None;
        }
        let mut byte = 0u8;
        // SAFETY: one-byte buffer, zero-tick wait (non-blocking).
        let n = unsafe { uart_read_bytes(num, (&mut byte as *mut u8).cast(), 1, 0) };
        (n == 1).then_some(byte)
    }

    fn serial_available(&self, port: UartPort) -> usize {
        let Some(num) = Self::uart_num(port) else {
            return 0;
        };
        if !self.open_uarts[Self::uart_slot(port)] {
            return 0;
        }
        let mut len: usize = 0;
        // SAFETY: len is a valid out-pointer.
        unsafe {
            uart_get_buffered_data_len(num, &mut len);
        }
        len
    }

    fn pulse_in(&mut self, pin: u8, state: PinState, timeout_us: u32) -> Option<u32> {
        let deadline = Self::micros() + i64::from(timeout_us);
        let idle = if state == PinState::High { PinState::Low } else { PinState::High };
        if !Self::wait_for_level(pin, idle, deadline) {
            return None;
        }
        if !Self::wait_for_level(pin, state, deadline) {
            return None;
        }
        let start = Self::micros();
        if !Self::wait_for_level(pin, idle, deadline) {
            return None;
        }
        Some((Self::micros() - start) as u32)
    }

    fn color_sensor_begin(&mut self, integration_time_ms: u16, gain: u8) -> Result<(), HalError> {
        let gain = gain_code(gain).ok_or(HalError::NoDevice)?;
        self.i2c_setup()?;

        let mut id = [0u8; 1];
        Self::tcs_read(tcs::CMD | tcs::REG_ID, &mut id)?;
        if !tcs::IDS.contains(&id[0]) {
            warn!("Board: unexpected color sensor id 0x{:02X}", id[0]);
            return Err(HalError::NoDevice);
        }
        Self::tcs_write(tcs::REG_ATIME, atime_code(integration_time_ms))?;
        Self::tcs_write(tcs::REG_CONTROL, gain)?;
        Self::tcs_write(tcs::REG_ENABLE, tcs::ENABLE_PON)?;
        self.delay_ms(3);
        Self::tcs_write(tcs::REG_ENABLE, tcs::ENABLE_PON | tcs::ENABLE_AEN)
    }

    fn color_sensor_read(&mut self) -> Result<[u16; 3], HalError> {
        let mut raw = [0u8; 6];
        Self::tcs_read(tcs::CMD_AUTO_INC | tcs::REG_RDATAL, &mut raw)?;
        Ok([
            u16::from_le_bytes([raw[0], raw[1]]),
            u16::from_le_bytes([raw[2], raw[3]]),
            u16::from_le_bytes([raw[4], raw[5]]),
        ])
    }

    fn step_pwm(&mut self, pin: u8, frequency_hz: u32) {
        if frequency_hz == 0 {
            if self.pwm_pin == Some(pin) {
                // SAFETY: channel was configured by a previous step_pwm.
                unsafe {
                    ledc_stop(ledc_mode_t_LEDC_LOW_SPEED_MODE, STEP_LEDC_CHANNEL, 0);
                }
                self.pwm_pin = None;
            }
            return;
        }

        let timer = ledc_timer_config_t {
            speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
            timer_num: STEP_LEDC_TIMER,
            duty_resolution: ledc_timer_bit_t_LEDC_TIMER_10_BIT,
            freq_hz: frequency_hz,
            clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
            ..Default::default()
        };
        let channel = ledc_channel_config_t {
            speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
            channel: STEP_LEDC_CHANNEL,
            timer_sel: STEP_LEDC_TIMER,
            gpio_num: i32::from(pin),
            // 50 % of 10-bit
            duty: 512,
            hpoint: 0,
            ..Default::default()
        };
        // SAFETY: LEDC timer 0 / channel 0 belong to the step generator and
        // are only reconfigured from the main task.
        let ok = unsafe { ledc_timer_config(&timer) == ESP_OK as i32 && ledc_channel_config(&channel) == ESP_OK as i32 };
        if ok {
            self.pwm_pin = Some(pin);
        } else {
            warn!("Board: LEDC setup for GPIO{} at {} Hz failed", pin, frequency_hz);
        }
    }

    fn delay_us(&mut self, us: u32) {
        // SAFETY: busy-wait in ROM.
        unsafe { esp_rom_delay_us(us) }
    }

    fn delay_ms(&mut self, ms: u32) {
        let ticks = (ms.saturating_mul(configTICK_RATE_HZ) / 1000).max(1);
        // SAFETY: called from a FreeRTOS task.
        unsafe { vTaskDelay(ticks) }
    }

    fn millis(&self) -> u64 {
        (Self::micros() / 1_000) as u64
    }

    fn free_memory(&self) -> u32 {
        // SAFETY: heap statistics read.
        unsafe { esp_get_free_heap_size() }
    }
}
