//! Cooperative event scheduler, the controller's main loop.
//!
//! One tick does at most one unit of work, and pending driver events
//! always win over new gateway requests:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          tick()                              │
//! │                                                              │
//! │  armed profiles (ascending id) ──▶ poll_event ──┐            │
//! │                                                 │ fired?     │
//! │                          ┌──── yes ─────────────┘            │
//! │                          ▼                                   │
//! │                   send event Response            no          │
//! │                                                  │           │
//! │  transport ──▶ FrameDecoder ──▶ Dispatcher ◀─────┘           │
//! │                                     │                        │
//! │                                     ▼                        │
//! │                              send Response                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Controller::run`] repeats `tick` forever with a fixed pause between
//! ticks.  Nothing here is shared across threads.

use log::{debug, info, warn};

use crate::app::ports::{HalPort, PersistencePort};
use crate::config::ControllerConfig;
use crate::drivers::DriverSettings;
use crate::registry::{ProfileId, ProfileRegistry};
use crate::rpc::codec::{FRAME_BUF_SIZE, FrameDecoder, encode_response};
use crate::rpc::dispatch::Dispatcher;
use crate::rpc::messages::Response;
use crate::rpc::transport::Transport;

// ═══════════════════════════════════════════════════════════════
//  Tick outcome
// ═══════════════════════════════════════════════════════════════

/// What a single [`Controller::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// An armed driver fired and its response was sent.
    Event(ProfileId),
    /// One frame was consumed and answered.
    Request,
    /// Nothing to do, or a frame is still incomplete.
    Idle,
}

// ═══════════════════════════════════════════════════════════════
//  Controller
// ═══════════════════════════════════════════════════════════════

/// Owns every piece of controller state.
pub struct Controller<T: Transport, H: HalPort, P: PersistencePort> {
    transport: T,
    hal: H,
    registry: ProfileRegistry,
    dispatcher: Dispatcher<P>,
    decoder: FrameDecoder,
    config: ControllerConfig,
    out_buf: [u8; FRAME_BUF_SIZE],
}

impl<T: Transport, H: HalPort, P: PersistencePort> Controller<T, H, P> {
    pub fn new(config: ControllerConfig, transport: T, hal: H, persistence: P) -> Self {
        let settings = DriverSettings::from(&config);
        Self {
            transport,
            hal,
            registry: ProfileRegistry::new(),
            dispatcher: Dispatcher::new(persistence, settings),
            decoder: FrameDecoder::new(),
            config,
            out_buf: [0; FRAME_BUF_SIZE],
        }
    }

    /// Startup phase: replay persisted registrations (when enabled), then
    /// announce readiness with a DEBUG banner.
    pub fn start(&mut self) -> usize {
        let restored = if self.config.restore_on_boot {
            self.dispatcher.restore(&mut self.registry, &mut self.hal)
        } else {
            0
        };
        let banner = Response::debug(format_args!(
            "controller {} ready, {} profiles restored",
            self.config.firmware_version, restored
        ));
        self.send(&banner);
        info!(
            "Scheduler: ready ({} profiles, tick {} ms)",
            restored, self.config.tick_interval_ms
        );
        restored
    }

    /// Run forever.
    pub fn run(&mut self) -> ! {
        loop {
            self.tick();
            self.hal.delay_ms(self.config.tick_interval_ms);
        }
    }

    /// One scheduler step.
    pub fn tick(&mut self) -> TickOutcome {
        if let Some((id, response)) = self.poll_armed() {
            debug!("Scheduler: event from profile {}", id);
            self.send(&response);
            return TickOutcome::Event(id);
        }

        if !self.transport.available() {
            return TickOutcome::Idle;
        }

        let mut byte = [0u8; 1];
        loop {
            match self.transport.read(&mut byte) {
                Ok(1) => {}
                Ok(_) => return TickOutcome::Idle,
                Err(e) => {
                    warn!("Scheduler: transport read failed: {:?}", e);
                    return TickOutcome::Idle;
                }
            }

            let response = match self.decoder.push(byte[0]) {
                Ok(None) => continue,
                Ok(Some(payload)) => {
                    self.dispatcher
                        .dispatch_frame(payload, &mut self.registry, &mut self.hal)
                }
                Err(e) => Dispatcher::<P>::reject_frame(e),
            };
            self.send(&response);
            return TickOutcome::Request;
        }
    }

    /// First armed profile (lowest id) whose driver has a result.
    fn poll_armed(&mut self) -> Option<(ProfileId, Response)> {
        if !self.registry.has_armed() {
            return None;
        }
        for id in ProfileId::all() {
            let fired = self
                .registry
                .poll_event(id, &mut self.hal, self.dispatcher.settings());
            if let Some(response) = fired {
                return Some((id, response));
            }
        }
        None
    }

    fn send(&mut self, response: &Response) {
        let len = match encode_response(response, &mut self.out_buf) {
            Ok(len) => len,
            Err(e) => {
                warn!("Scheduler: response encode failed: {}", e);
                return;
            }
        };
        match self.transport.write_all(&self.out_buf[..len]) {
            Ok(written) if written == len => {}
            Ok(written) => warn!("Scheduler: short write ({}/{} bytes)", written, len),
            Err(e) => warn!("Scheduler: transport write failed: {:?}", e),
        }
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn persistence(&self) -> &P {
        self.dispatcher.persistence()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}
