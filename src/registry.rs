//! Profile registry: a fixed table of live driver bindings.
//!
//! One slot per [`ProfileId`].  A slot is either empty or holds the
//! registration that created it together with the driver's live state.
//! A parallel 256-bit bitmap records which profiles have an event armed.
//!
//! Registration is replace-or-nothing: the old binding is torn down first
//! and, if the new driver fails to initialise, the slot stays empty.

use core::fmt;

use log::{debug, info, warn};

use crate::app::ports::HalPort;
use crate::drivers::{Driver, DriverContext, DriverSettings, Resource};
use crate::error::{DriverError, Error, InitError};
use crate::rpc::messages::{ActionParams, DriverConfig, DriverKind, Registration, Response};

/// Number of addressable profiles.
pub const MAX_PROFILES: usize = 256;

// ───────────────────────────────────────────────────────────────
// Profile id
// ───────────────────────────────────────────────────────────────

/// Index of a profile slot, 0..=255.  Profile 0 is a regular profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProfileId(u8);

impl ProfileId {
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Every id in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..=u8::MAX).map(Self)
    }
}

impl TryFrom<u32> for ProfileId {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self, Error> {
        u8::try_from(raw)
            .map(Self)
            .map_err(|_| Error::InvalidProfileId(raw))
    }
}

impl From<ProfileId> for u32 {
    fn from(id: ProfileId) -> Self {
        u32::from(id.0)
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ───────────────────────────────────────────────────────────────
// Event bitmap
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct EventBitmap([u32; MAX_PROFILES / 32]);

impl EventBitmap {
    fn set(&mut self, id: ProfileId) {
        self.0[id.index() / 32] |= 1 << (id.index() % 32);
    }

    fn clear(&mut self, id: ProfileId) {
        self.0[id.index() / 32] &= !(1 << (id.index() % 32));
    }

    fn get(&self, id: ProfileId) -> bool {
        self.0[id.index() / 32] & (1 << (id.index() % 32)) != 0
    }

    fn any(&self) -> bool {
        self.0.iter().any(|word| *word != 0)
    }

    fn iter(self) -> impl Iterator<Item = ProfileId> {
        ProfileId::all().filter(move |id| self.get(*id))
    }
}

// ───────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────

struct Slot {
    registration: Registration,
    driver: Driver,
}

/// Owner of every live driver.  The slot table is one fixed-length heap
/// allocation so the registry can live inside a small task stack.
pub struct ProfileRegistry {
    slots: Box<[Option<Slot>]>,
    armed: EventBitmap,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self {
            slots: core::iter::repeat_with(|| None)
                .take(MAX_PROFILES)
                .collect(),
            armed: EventBitmap::default(),
        }
    }

    /// Current registration of `id`, if any.
    pub fn lookup(&self, id: ProfileId) -> Option<&Registration> {
        self.slots[id.index()].as_ref().map(|slot| &slot.registration)
    }

    /// Driver kind bound to `id`, if any.
    pub fn driver_kind(&self, id: ProfileId) -> Option<DriverKind> {
        self.slots[id.index()].as_ref().map(|slot| slot.driver.kind())
    }

    /// Bind `config` to `id`, replacing whatever was there.
    ///
    /// The previous binding is always released first.  On error the slot is
    /// left empty.
    pub fn register(
        &mut self,
        id: ProfileId,
        config: DriverConfig,
        hal: &mut dyn HalPort,
    ) -> Result<(), InitError> {
        self.delete(id, hal);

        let kind = config.kind();
        for claim in config.resources() {
            if let Some(holder) = self.holder_of(claim) {
                warn!("Registry: profile {id} wants {claim}, held by profile {holder}");
                return Err(InitError {
                    kind,
                    cause: DriverError::ResourceBusy(holder),
                });
            }
        }

        let driver = Driver::init(id, &config, hal).map_err(|cause| {
            warn!("Registry: profile {id} {kind} init failed: {cause}");
            InitError { kind, cause }
        })?;

        self.slots[id.index()] = Some(Slot {
            registration: Registration::new(id, config),
            driver,
        });
        info!("Registry: profile {id} bound to {kind}");
        Ok(())
    }

    /// Release and vacate `id`.  Returns `false` if the slot was already
    /// empty.
    pub fn delete(&mut self, id: ProfileId, hal: &mut dyn HalPort) -> bool {
        self.disarm_event(id);
        match self.slots[id.index()].take() {
            Some(mut slot) => {
                slot.driver.release(hal);
                debug!("Registry: profile {id} released");
                true
            }
            None => false,
        }
    }

    /// Run an action against the driver bound to `id`.
    ///
    /// Any event still pending on the profile is dropped first.  Returns
    /// `None` when the slot is empty.
    pub fn run_action(
        &mut self,
        id: ProfileId,
        params: &ActionParams,
        hal: &mut dyn HalPort,
        settings: &DriverSettings,
    ) -> Option<Response> {
        self.disarm_event(id);
        let slot = self.slots[id.index()].as_mut()?;

        let mut ctx = DriverContext::new(id, hal, settings);
        let response = slot.driver.action(params, &mut ctx);
        if ctx.arm_requested() {
            self.armed.set(id);
            debug!("Registry: profile {id} armed");
        }
        Some(response)
    }

    /// Poll the armed driver at `id`.  A fired event disarms the profile.
    pub fn poll_event(
        &mut self,
        id: ProfileId,
        hal: &mut dyn HalPort,
        settings: &DriverSettings,
    ) -> Option<Response> {
        if !self.armed.get(id) {
            return None;
        }
        let Some(slot) = self.slots[id.index()].as_mut() else {
            self.disarm_event(id);
            return None;
        };

        let mut ctx = DriverContext::new(id, hal, settings);
        let fired = slot.driver.poll_event(&mut ctx)?;
        self.disarm_event(id);
        Some(fired)
    }

    /// Mark `id` as awaiting an event.  No-op on an empty slot.
    pub fn arm_event(&mut self, id: ProfileId) -> bool {
        if self.slots[id.index()].is_none() {
            return false;
        }
        self.armed.set(id);
        true
    }

    pub fn disarm_event(&mut self, id: ProfileId) {
        self.armed.clear(id);
    }

    pub fn is_armed(&self, id: ProfileId) -> bool {
        self.armed.get(id)
    }

    pub fn has_armed(&self) -> bool {
        self.armed.any()
    }

    /// Armed profiles in ascending order.
    pub fn armed(&self) -> impl Iterator<Item = ProfileId> {
        self.armed.iter()
    }

    /// Occupied slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (ProfileId, &Registration)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .map(|slot| (ProfileId::new(index as u8), &slot.registration))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn holder_of(&self, claim: Resource) -> Option<ProfileId> {
        self.iter()
            .find(|(_, registration)| {
                registration
                    .config
                    .as_ref()
                    .is_some_and(|config| config.resources().contains(&claim))
            })
            .map(|(id, _)| id)
    }
}
