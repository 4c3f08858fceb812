//! PeriphBridge firmware main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  Uart0Transport / StdioTransport     BoardHal     NvsAdapter │
//! │  (Transport)                        (HalPort)   (StoragePort)│
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ────────────────        │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ Controller: FrameDecoder · Dispatcher · ProfileRegistry│  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use periph_bridge::adapters::hardware::BoardHal;
use periph_bridge::adapters::nvs::{NvsAdapter, NvsProfileStore};
use periph_bridge::config::ControllerConfig;
use periph_bridge::scheduler::Controller;

#[cfg(target_os = "espidf")]
use periph_bridge::adapters::serial_transport::Uart0Transport;
#[cfg(not(target_os = "espidf"))]
use periph_bridge::adapters::serial_transport::StdioTransport;
#[cfg(not(target_os = "espidf"))]
use anyhow::Context;
#[cfg(not(target_os = "espidf"))]
use periph_bridge::{app::ports::HalPort, scheduler::TickOutcome};

/// JSON config file for the host simulation.
#[cfg(not(target_os = "espidf"))]
const CONFIG_ENV: &str = "PERIPH_BRIDGE_CONFIG";

/// Persisted configuration, or defaults when absent or unusable.  A board
/// without a stored configuration gets the defaults written on first boot.
fn load_config(storage: &mut NvsAdapter) -> ControllerConfig {
    match ControllerConfig::load(&*storage) {
        Ok(Some(config)) => {
            info!("Config loaded from NVS");
            config
        }
        Ok(None) => {
            let config = ControllerConfig::default();
            match config.save(storage) {
                Ok(()) => info!("Config: defaults stored"),
                Err(e) => warn!("Config: storing defaults failed ({})", e),
            }
            config
        }
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            ControllerConfig::default()
        }
    }
}

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  PeriphBridge v{}                    ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Persistence + config ───────────────────────────────
    let mut storage = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {}", e))?;
    let config = load_config(&mut storage);
    let persistence = NvsProfileStore::new(storage);

    // ── 3. Gateway link + board ───────────────────────────────
    let transport = Uart0Transport::new(config.baud_rate)
        .map_err(|e| anyhow::anyhow!("UART0 init failed: {}", e))?;
    let hal = BoardHal::new();

    // ── 4. Main loop ──────────────────────────────────────────
    let mut controller = Controller::new(config, transport, hal, persistence);
    controller.start();
    controller.run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("PeriphBridge v{} (host simulation)", env!("CARGO_PKG_VERSION"));

    let mut storage =
        NvsAdapter::new().map_err(|e| anyhow::anyhow!("storage init failed: {}", e))?;
    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.to_string_lossy()))?;
            ControllerConfig::from_json(&bytes)
                .map_err(|e| anyhow::anyhow!("{}: {}", path.to_string_lossy(), e))?
        }
        None => load_config(&mut storage),
    };
    let tick_ms = config.tick_interval_ms;

    let transport = StdioTransport::new()?;
    let mut controller = Controller::new(
        config,
        transport,
        BoardHal::new(),
        NvsProfileStore::new(storage),
    );
    controller.start();

    loop {
        if controller.tick() == TickOutcome::Idle {
            if controller.transport().is_closed() && !controller.registry().has_armed() {
                break;
            }
            controller.hal_mut().delay_ms(tick_ms);
        }
    }

    info!("stdin closed, {} profiles registered", controller.registry().len());
    Ok(())
}
