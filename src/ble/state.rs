//! Connection and Advertising State
//!
//! Two small state machines owned by the application and mutated only by the
//! event dispatcher and the advertising control calls:
//!
//! ```text
//! Connection:  Disconnected --Connected--> Connected --Disconnected--> Disconnected
//! Advertising: Idle --start--> Advertising --Connected--> Suspended --Disconnected--> Advertising
//! ```
//!
//! `Suspended` makes explicit that the controller stops advertising on its
//! own the moment a connection forms; the restart on disconnect compensates
//! for that.

use defmt::Format;

use crate::ble::address::Address;
use crate::core::config::ATT_MTU_DEFAULT;

/// Controller-assigned connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct ConnectionHandle(pub u16);

impl ConnectionHandle {
    /// BLE_CONN_HANDLE_INVALID
    pub const INVALID: Self = Self(0xFFFF);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    pub fn raw(&self) -> u16 {
        self.0
    }
}

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum ConnectionState {
    Disconnected,
    Connected {
        handle: ConnectionHandle,
        /// ATT MTU in effect on this connection
        mtu: u16,
    },
}

impl ConnectionState {
    pub fn handle(&self) -> ConnectionHandle {
        match self {
            ConnectionState::Disconnected => ConnectionHandle::INVALID,
            ConnectionState::Connected { handle, .. } => *handle,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// MTU to size outgoing payloads with; the default until an exchange completes
    pub fn effective_mtu(&self) -> u16 {
        match self {
            ConnectionState::Disconnected => ATT_MTU_DEFAULT,
            ConnectionState::Connected { mtu, .. } => *mtu,
        }
    }
}

/// Advertising state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum AdvertisingState {
    Idle,
    /// Controller is advertising with this set
    Advertising { handle: u8 },
    /// Application wants to advertise, but the controller stopped when a
    /// connection formed
    Suspended { handle: u8 },
}

impl AdvertisingState {
    /// Application intent: true while advertising or suspended by a connection
    pub fn is_advertising(&self) -> bool {
        !matches!(self, AdvertisingState::Idle)
    }

    pub fn handle(&self) -> Option<u8> {
        match self {
            AdvertisingState::Idle => None,
            AdvertisingState::Advertising { handle } | AdvertisingState::Suspended { handle } => Some(*handle),
        }
    }
}

/// All mutable state the dispatcher works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct DispatcherState {
    pub connection: ConnectionState,
    pub advertising: AdvertisingState,
}

impl DispatcherState {
    pub const fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            advertising: AdvertisingState::Idle,
        }
    }

    pub fn conn_handle(&self) -> ConnectionHandle {
        self.connection.handle()
    }
}

impl Default for DispatcherState {
    fn default() -> Self {
        Self::new()
    }
}

/// Peer handed to the connect handler. Built per event, never retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct Device {
    /// Only known on connect
    pub address: Option<Address>,
    pub handle: ConnectionHandle,
}
