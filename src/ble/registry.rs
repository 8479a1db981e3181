//! Characteristic Write Handler Registry
//!
//! Maps attribute handles to the application callback that receives writes
//! to them. Application code may register or unregister handlers at any time;
//! the dispatcher only holds the lock long enough to copy the callback out and
//! invokes it after the lock is released.

use ::core::cell::RefCell;

use defmt::{debug, error, Format};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::index_map::FnvIndexMap;

use crate::ble::state::ConnectionHandle;
use crate::core::controller::Controller;
use crate::core::error::ErrorCode;

/// Default registry capacity (must be a power of two)
pub const MAX_WRITE_HANDLERS: usize = 16;

/// Write callback: `(connection, offset, data)`.
///
/// `data` points into the shared event buffer and is only valid until the
/// callback returns; copy it to keep it.
pub type WriteCallback = fn(ConnectionHandle, u16, &[u8]);

/// Registry errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum RegistryError {
    Full,
    /// The controller refused to add the attribute
    Controller(ErrorCode),
}

/// Attribute handle to write callback map
pub struct WriteHandlerRegistry<const N: usize> {
    handlers: Mutex<CriticalSectionRawMutex, RefCell<FnvIndexMap<u16, WriteCallback, N>>>,
}

impl<const N: usize> WriteHandlerRegistry<N> {
    pub const fn new() -> Self {
        Self {
            handlers: Mutex::new(RefCell::new(FnvIndexMap::new())),
        }
    }

    /// Register `callback` for writes to `handle`, replacing any previous one
    pub fn register(&self, handle: u16, callback: WriteCallback) -> Result<(), RegistryError> {
        self.handlers.lock(|handlers| {
            match handlers.borrow_mut().insert(handle, callback) {
                Ok(_) => {
                    debug!("REGISTRY: Write handler registered for handle {}", handle);
                    Ok(())
                }
                Err(_) => {
                    error!("REGISTRY: Failed to register handle {} - registry full", handle);
                    Err(RegistryError::Full)
                }
            }
        })
    }

    /// Add a writable characteristic to `service` and route its writes to
    /// `callback`. Returns the characteristic's value handle.
    pub fn add_characteristic<C: Controller>(
        &self,
        controller: &mut C,
        service: u16,
        uuid: u16,
        max_len: u16,
        callback: WriteCallback,
    ) -> Result<u16, RegistryError> {
        let handle = controller
            .add_writable_characteristic(service, uuid, max_len)
            .map_err(|e| {
                error!("REGISTRY: Failed to add characteristic {=u16:#x}: {}", uuid, e);
                RegistryError::Controller(e)
            })?;
        self.register(handle, callback)?;
        Ok(handle)
    }

    pub fn unregister(&self, handle: u16) -> Option<WriteCallback> {
        self.handlers.lock(|handlers| handlers.borrow_mut().remove(&handle))
    }

    /// Copy out the callback for `handle`
    pub fn lookup(&self, handle: u16) -> Option<WriteCallback> {
        self.handlers.lock(|handlers| handlers.borrow().get(&handle).copied())
    }

    pub fn len(&self) -> usize {
        self.handlers.lock(|handlers| handlers.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.handlers.lock(|handlers| handlers.borrow_mut().clear());
    }
}

impl<const N: usize> Default for WriteHandlerRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry the firmware registers its characteristics in
pub static WRITE_HANDLERS: WriteHandlerRegistry<MAX_WRITE_HANDLERS> = WriteHandlerRegistry::new();
