//! NVS (Non-Volatile Storage) adapter.
//!
//! [`NvsAdapter`] implements [`StoragePort`] over ESP-IDF NVS blobs (or an
//! in-memory map on the host).  [`NvsProfileStore`] layers the profile
//! [`PersistencePort`] on top of any `StoragePort`: one postcard blob per
//! profile under the `"profiles"` namespace, keyed `p<id>`.
//!
//! - Atomic writes: ESP-IDF NVS commits are atomic per nvs_commit().
//! - Namespace isolation: each subsystem uses its own namespace.

use core::fmt::Write as _;

use log::{info, warn};

use crate::app::ports::{PersistencePort, StorageError, StoragePort};
use crate::registry::ProfileId;
use crate::rpc::messages::Registration;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Namespace holding one blob per registered profile.
pub const PROFILE_NAMESPACE: &str = "profiles";

/// Upper bound of an encoded [`Registration`].
const MAX_RECORD_SIZE: usize = 64;

/// NVS keys and namespaces are limited to 15 characters.
#[cfg(target_os = "espidf")]
fn nvs_name(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(15);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is erased
    /// and re-initialised automatically.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES as i32 || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK as i32 {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK as i32 {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK as i32 {
                return Err(StorageError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns_buf = nvs_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        // SAFETY: ns_buf is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns_buf.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK as i32 {
            return Err(ret);
        }

        let result = f(handle);
        // SAFETY: handle was opened above and is not used afterwards.
        unsafe {
            nvs_close(handle);
        }
        result
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            match self.store.borrow().get(&composite) {
                Some(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key_buf = nvs_name(key);
                let mut size = buf.len();
                // SAFETY: buf and size describe a valid writable region.
                let ret = unsafe {
                    nvs_get_blob(handle, key_buf.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                if ret != ESP_OK as i32 {
                    return Err(ret);
                }
                Ok(size)
            });
            match result {
                Ok(size) => Ok(size),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND as i32 => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().insert(composite, data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key_buf = nvs_name(key);
                // SAFETY: data outlives the call; NVS copies it to flash.
                let ret = unsafe {
                    nvs_set_blob(handle, key_buf.as_ptr().cast(), data.as_ptr().cast(), data.len())
                };
                if ret != ESP_OK as i32 {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK as i32 {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE as i32 {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().remove(&composite);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key_buf = nvs_name(key);
                let ret = unsafe { nvs_erase_key(handle, key_buf.as_ptr().cast()) };
                if ret != ESP_OK as i32 && ret != ESP_ERR_NVS_NOT_FOUND as i32 {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK as i32 {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => Ok(()),
                // Namespace never created: nothing to delete.
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND as i32 => Ok(()),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow().contains_key(&composite)
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key_buf = nvs_name(key);
                let ret = unsafe {
                    nvs_find_key(handle, key_buf.as_ptr().cast(), core::ptr::null_mut())
                };
                Ok(ret == ESP_OK as i32)
            });
            result.unwrap_or(false)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Profile persistence
// ───────────────────────────────────────────────────────────────

/// Registry persistence over a key-value store.
pub struct NvsProfileStore<S: StoragePort> {
    storage: S,
}

impl<S: StoragePort> NvsProfileStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    fn key(profile_id: ProfileId) -> heapless::String<8> {
        let mut key = heapless::String::new();
        // "p255" always fits.
        let _ = write!(key, "p{}", profile_id.get());
        key
    }

    fn load(&mut self, profile_id: ProfileId) -> Result<Option<Registration>, StorageError> {
        let key = Self::key(profile_id);
        if !self.storage.exists(PROFILE_NAMESPACE, &key) {
            return Ok(None);
        }
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let len = self.storage.read(PROFILE_NAMESPACE, &key, &mut buf)?;
        match postcard::from_bytes::<Registration>(&buf[..len]) {
            Ok(reg) if reg.profile_id == u32::from(profile_id) => return Ok(Some(reg)),
            Ok(reg) => warn!(
                "ProfileStore: record {} claims profile {}, discarding",
                key, reg.profile_id
            ),
            Err(e) => warn!("ProfileStore: corrupt record {} ({}), discarding", key, e),
        }
        // Unusable records would be skipped on every boot.
        self.remove(profile_id);
        Ok(None)
    }
}

impl<S: StoragePort> PersistencePort for NvsProfileStore<S> {
    fn store(&mut self, registration: &Registration) {
        let Ok(profile_id) = ProfileId::try_from(registration.profile_id) else {
            warn!("ProfileStore: refusing to store profile {}", registration.profile_id);
            return;
        };
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let bytes = match postcard::to_slice(registration, &mut buf) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("ProfileStore: encode profile {} failed ({})", profile_id, e);
                return;
            }
        };
        if let Err(e) = self
            .storage
            .write(PROFILE_NAMESPACE, &Self::key(profile_id), bytes)
        {
            warn!("ProfileStore: write profile {} failed ({})", profile_id, e);
        }
    }

    fn remove(&mut self, profile_id: ProfileId) {
        if let Err(e) = self.storage.delete(PROFILE_NAMESPACE, &Self::key(profile_id)) {
            warn!("ProfileStore: delete profile {} failed ({})", profile_id, e);
        }
    }

    fn load_all(&mut self) -> Vec<Registration> {
        ProfileId::all()
            .filter_map(|id| match self.load(id) {
                Ok(reg) => reg,
                Err(e) => {
                    warn!("ProfileStore: read profile {} failed ({})", id, e);
                    None
                }
            })
            .collect()
    }
}
