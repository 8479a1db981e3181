//! BLE Event Dispatcher
//!
//! Handles controller events one at a time for a single-connection
//! peripheral: tracks the connection and advertising state, answers the
//! in-band negotiations (MTU exchange, data length update, PHY update) with
//! exactly one reply each, and hands connects, disconnects and attribute
//! writes to the application.
//!
//! Dispatch runs to completion and never waits. Errors returned by replies
//! are logged and dropped: a rejected reply stalls the peer's negotiation
//! and there is no protocol for retrying it.

use defmt::{debug, error, info, warn};

use crate::ble::address::Address;
use crate::ble::events::{BleEvent, DataLengthParams, EventBuffer, GapEvent, GattsEvent, PhyPreference, WriteEvent};
use crate::ble::registry::WriteHandlerRegistry;
use crate::ble::state::{AdvertisingState, ConnectionHandle, ConnectionState, Device, DispatcherState};
use crate::core::config::{Configuration, ATT_MTU_DEFAULT, CONN_CFG_TAG};
use crate::core::controller::Controller;

/// Connect handler: `(device, connected)`
pub type ConnectHandler = fn(Device, bool);

/// MTU to answer an exchange request with.
///
/// Never below the ATT minimum, whatever the peer asks for.
pub fn effective_mtu(configured: u16, peer: u16) -> u16 {
    configured.min(peer).max(ATT_MTU_DEFAULT)
}

pub struct Dispatcher<'r, C: Controller, const N: usize> {
    controller: C,
    att_mtu: u16,
    on_connect: Option<ConnectHandler>,
    write_handlers: &'r WriteHandlerRegistry<N>,
}

impl<'r, C: Controller, const N: usize> Dispatcher<'r, C, N> {
    pub fn new(controller: C, cfg: &Configuration, write_handlers: &'r WriteHandlerRegistry<N>) -> Self {
        Self {
            controller,
            att_mtu: cfg.gatt.att_mtu,
            on_connect: None,
            write_handlers,
        }
    }

    pub fn set_connect_handler(&mut self, handler: ConnectHandler) {
        self.on_connect = Some(handler);
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Drain every event the controller has pending.
    ///
    /// Returns the number of events fetched.
    pub fn pump(&mut self, state: &mut DispatcherState, buf: &mut EventBuffer) -> usize {
        let mut count = 0;
        loop {
            match self.controller.fetch_event(buf) {
                Ok(Some(len)) => {
                    self.dispatch_one(state, buf.event(len));
                    count += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    error!("EVENT: Failed to fetch event: {}", e);
                    break;
                }
            }
        }
        count
    }

    /// Decode and handle one event straight from the event buffer
    pub fn dispatch_one(&mut self, state: &mut DispatcherState, buf: &[u8]) {
        match BleEvent::decode(buf) {
            Ok(event) => self.dispatch(state, event),
            Err(e) => warn!("EVENT: Dropping undecodable event: {}", e),
        }
    }

    /// Handle one decoded event
    pub fn dispatch(&mut self, state: &mut DispatcherState, event: BleEvent<'_>) {
        match event {
            BleEvent::Gap { conn_handle, event } => self.on_gap_event(state, conn_handle, event),
            BleEvent::Gatts { conn_handle, event } => self.on_gatts_event(state, conn_handle, event),
            BleEvent::Unknown(id) => debug!("EVENT: Unknown event {=u16:#x}", id),
        }
    }

    fn on_gap_event(&mut self, state: &mut DispatcherState, conn: ConnectionHandle, event: GapEvent) {
        match event {
            GapEvent::Connected { peer } => self.on_connected(state, conn, peer),
            GapEvent::Disconnected { reason } => self.on_disconnected(state, conn, reason),
            GapEvent::DataLengthUpdateRequest { peer_params } => self.on_data_length_request(conn, peer_params),
            GapEvent::DataLengthUpdate { effective_params } => {
                debug!("GAP: Data length updated on {}: {}", conn, effective_params);
            }
            GapEvent::PhyUpdateRequest { peer_preferred } => self.on_phy_request(conn, peer_preferred),
            GapEvent::PhyUpdate { status, tx_phy, rx_phy } => {
                debug!("GAP: PHY updated on {} (status {}): tx={} rx={}", conn, status, tx_phy, rx_phy);
            }
            GapEvent::Other(id) => debug!("GAP: Unhandled event {=u16:#x}", id),
        }
    }

    fn on_gatts_event(&mut self, state: &mut DispatcherState, conn: ConnectionHandle, event: GattsEvent<'_>) {
        match event {
            GattsEvent::Write(write) => self.on_write(conn, write),
            GattsEvent::SysAttrMissing { hint } => {
                debug!("GATTS: System attributes missing on {} (hint {})", conn, hint);
                // Nothing stored for any peer; an error here has no remedy
                if let Err(e) = self.controller.reply_sys_attr_missing(conn) {
                    debug!("GATTS: sys_attr_set failed: {}", e);
                }
            }
            GattsEvent::ExchangeMtuRequest { client_rx_mtu } => self.on_mtu_request(state, conn, client_rx_mtu),
            GattsEvent::HvnTxComplete { count } => {
                debug!("GATTS: {} notification(s) sent on {}", count, conn);
            }
            GattsEvent::Other(id) => debug!("GATTS: Unhandled event {=u16:#x}", id),
        }
    }

    fn on_connected(&mut self, state: &mut DispatcherState, conn: ConnectionHandle, peer: Address) {
        info!("GAP: Connected to {} with handle {}", peer, conn);

        if let ConnectionState::Connected { handle, .. } = state.connection {
            warn!("GAP: Connected event for {} while {} is still connected", conn, handle);
        }
        state.connection = ConnectionState::Connected {
            handle: conn,
            mtu: ATT_MTU_DEFAULT,
        };

        // The controller stops advertising as soon as a connection forms
        if let AdvertisingState::Advertising { handle } = state.advertising {
            state.advertising = AdvertisingState::Suspended { handle };
        }

        if let Some(handler) = self.on_connect {
            handler(
                Device {
                    address: Some(peer),
                    handle: conn,
                },
                true,
            );
        }
    }

    fn on_disconnected(&mut self, state: &mut DispatcherState, conn: ConnectionHandle, reason: u8) {
        info!("GAP: Disconnected {} (reason {=u8:#x})", conn, reason);

        match state.connection {
            ConnectionState::Disconnected => warn!("GAP: Disconnected event for {} while not connected", conn),
            ConnectionState::Connected { handle, .. } if handle != conn => {
                warn!("GAP: Disconnected event for {} but connected on {}", conn, handle);
            }
            ConnectionState::Connected { .. } => {}
        }
        state.connection = ConnectionState::Disconnected;

        // Re-assert the application's intent to advertise. The set is restarted
        // as configured (connectable), not reconfigured.
        if let Some(handle) = state.advertising.handle() {
            match self.controller.start_advertising(handle, CONN_CFG_TAG) {
                Ok(()) => {
                    debug!("GAP: Advertising restarted on set {}", handle);
                    state.advertising = AdvertisingState::Advertising { handle };
                }
                Err(e) => {
                    error!("GAP: Failed to restart advertising on set {}: {}", handle, e);
                    state.advertising = AdvertisingState::Idle;
                }
            }
        }

        if let Some(handler) = self.on_connect {
            handler(
                Device {
                    address: None,
                    handle: conn,
                },
                false,
            );
        }
    }

    fn on_data_length_request(&mut self, conn: ConnectionHandle, peer_params: DataLengthParams) {
        debug!("GAP: Data length update requested on {}: {}", conn, peer_params);
        if let Err(e) = self.controller.reply_data_length_update(conn) {
            warn!("GAP: Data length update reply failed on {}: {}", conn, e);
        }
    }

    fn on_phy_request(&mut self, conn: ConnectionHandle, peer_preferred: PhyPreference) {
        debug!("GAP: PHY update requested on {}: {}", conn, peer_preferred);
        if let Err(e) = self.controller.reply_phy_update(conn, peer_preferred) {
            warn!("GAP: PHY update reply failed on {}: {}", conn, e);
        }
    }

    fn on_mtu_request(&mut self, state: &mut DispatcherState, conn: ConnectionHandle, client_rx_mtu: u16) {
        let mtu = effective_mtu(self.att_mtu, client_rx_mtu);
        debug!(
            "GATTS: MTU exchange requested. self: {}, peer: {}, effective: {}",
            self.att_mtu, client_rx_mtu, mtu
        );

        match self.controller.reply_exchange_mtu(conn, mtu) {
            Ok(()) => {
                if let ConnectionState::Connected { handle, .. } = state.connection {
                    if handle == conn {
                        state.connection = ConnectionState::Connected { handle, mtu };
                    }
                }
            }
            Err(e) => warn!("GATTS: MTU exchange reply failed on {}: {}", conn, e),
        }
    }

    fn on_write(&mut self, conn: ConnectionHandle, write: WriteEvent<'_>) {
        // The lock is released before the handler runs
        match self.write_handlers.lookup(write.handle) {
            Some(callback) => callback(conn, write.offset, write.data),
            None => debug!("GATTS: Write to unregistered handle {}", write.handle),
        }
    }
}
