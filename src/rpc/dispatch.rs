//! Request dispatcher: turns decoded requests into registry calls.
//!
//! **Transport-decoupled**: the dispatcher does not own a transport.
//! Callers hand it one complete frame payload via [`dispatch_frame`] and
//! receive exactly one [`Response`] to send back.
//!
//! Every request takes one of three paths:
//!
//! 1. **Registration**: bind (or re-bind) a driver to a profile, then
//!    mirror the outcome into persistence.
//! 2. **Action**: run one driver operation on an existing binding.
//! 3. **Invalid**: undecodable bytes or an empty request; answered with
//!    an ERROR that names no profile.
//!
//! [`dispatch_frame`]: Dispatcher::dispatch_frame

use log::{debug, info, warn};

use crate::app::ports::{HalPort, PersistencePort};
use crate::drivers::DriverSettings;
use crate::error::{DecodeError, Error};
use crate::registry::{ProfileId, ProfileRegistry};
use crate::rpc::codec::decode_request;
use crate::rpc::messages::{Action, Registration, Request, RequestPayload, Response};

pub struct Dispatcher<P: PersistencePort> {
    persistence: P,
    settings: DriverSettings,
}

impl<P: PersistencePort> Dispatcher<P> {
    pub fn new(persistence: P, settings: DriverSettings) -> Self {
        Self {
            persistence,
            settings,
        }
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Decode and dispatch one frame payload.
    pub fn dispatch_frame(
        &mut self,
        payload: &[u8],
        registry: &mut ProfileRegistry,
        hal: &mut dyn HalPort,
    ) -> Response {
        match decode_request(payload) {
            Ok(request) => self.dispatch(request, registry, hal),
            Err(e) => Self::reject_frame(e),
        }
    }

    /// ERROR for bytes that never became a request.
    pub fn reject_frame(err: DecodeError) -> Response {
        warn!("RPC: undecodable frame: {}", err);
        Response::error(None, &Error::Decode(err))
    }

    /// Dispatch one decoded request.
    pub fn dispatch(
        &mut self,
        request: Request,
        registry: &mut ProfileRegistry,
        hal: &mut dyn HalPort,
    ) -> Response {
        match request.payload {
            Some(RequestPayload::Registration(registration)) => {
                self.handle_registration(request.id, registration, registry, hal)
            }
            Some(RequestPayload::Action(action)) => {
                self.handle_action(request.id, &action, registry, hal)
            }
            None => {
                warn!("RPC[{}]: request without action or registration", request.id);
                Response::error(None, &Error::InvalidRequestShape)
            }
        }
    }

    /// Replay every persisted registration without answering the gateway
    /// or writing back.  Returns the number of profiles restored.
    pub fn restore(&mut self, registry: &mut ProfileRegistry, hal: &mut dyn HalPort) -> usize {
        let mut restored = 0;
        for registration in self.persistence.load_all() {
            let Ok(id) = ProfileId::try_from(registration.profile_id) else {
                warn!(
                    "RPC: stored profile {} out of range, skipped",
                    registration.profile_id
                );
                continue;
            };
            let Some(config) = registration.config else {
                warn!("RPC: stored profile {} has no driver, dropped", id);
                self.persistence.remove(id);
                continue;
            };
            match registry.register(id, config, hal) {
                Ok(()) => restored += 1,
                Err(e) => {
                    warn!("RPC: restoring profile {} failed: {}", id, e);
                    self.persistence.remove(id);
                }
            }
        }
        info!("RPC: restored {} profiles", restored);
        restored
    }

    // ── Registration path ────────────────────────────────────

    fn handle_registration(
        &mut self,
        req_id: u32,
        registration: Registration,
        registry: &mut ProfileRegistry,
        hal: &mut dyn HalPort,
    ) -> Response {
        let id = match ProfileId::try_from(registration.profile_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("RPC[{}]: {}", req_id, e);
                return Response::error(None, &e);
            }
        };
        let Some(config) = registration.config else {
            warn!("RPC[{}]: profile {} names an unknown driver", req_id, id);
            return Response::error(Some(id), &Error::UnknownDriverKind);
        };

        let kind = config.kind();
        match registry.register(id, config, hal) {
            Ok(()) => {
                info!("RPC[{}]: Registration profile={} kind={}", req_id, id, kind);
                if let Some(stored) = registry.lookup(id) {
                    self.persistence.store(stored);
                }
                Response::done(id)
            }
            Err(e) => {
                warn!("RPC[{}]: Registration profile={} rejected: {}", req_id, id, e);
                // The old binding is gone either way.
                self.persistence.remove(id);
                Response::error(Some(id), &Error::from(e))
            }
        }
    }

    // ── Action path ──────────────────────────────────────────

    fn handle_action(
        &mut self,
        req_id: u32,
        action: &Action,
        registry: &mut ProfileRegistry,
        hal: &mut dyn HalPort,
    ) -> Response {
        let id = match ProfileId::try_from(action.profile_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("RPC[{}]: {}", req_id, e);
                return Response::error(None, &e);
            }
        };

        let requested = action.params.kind();
        let registered = registry.driver_kind(id);
        if registered != Some(requested) {
            let err = Error::ActionDriverMismatch {
                registered,
                requested,
            };
            warn!("RPC[{}]: profile {}: {}", req_id, id, err);
            return Response::error(Some(id), &err);
        }

        debug!("RPC[{}]: Action profile={} kind={}", req_id, id, requested);
        registry
            .run_action(id, &action.params, hal, &self.settings)
            .unwrap_or_else(|| {
                Response::error(
                    Some(id),
                    &Error::ActionDriverMismatch {
                        registered: None,
                        requested,
                    },
                )
            })
    }
}
