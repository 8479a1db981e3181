//! Advertising Control
//!
//! Starts and stops the connectable advertising set and keeps
//! [`AdvertisingState`] in step with it. Building the advertising set
//! (payload, interval, PHY) happens beforehand; only its handle is used here.

use defmt::{debug, info, warn};

use crate::ble::state::{AdvertisingState, DispatcherState};
use crate::core::config::CONN_CFG_TAG;
use crate::core::controller::Controller;
use crate::core::error::ErrorCode;

/// Start advertising with a configured advertising set.
///
/// Only connectable advertising is supported, so this is refused while a
/// connection is up: the single connection slot is taken.
pub fn start<C: Controller>(controller: &mut C, state: &mut DispatcherState, adv_handle: u8) -> Result<(), ErrorCode> {
    if state.connection.is_connected() {
        warn!("GAP: Cannot start connectable advertising while connected");
        return Err(ErrorCode::INVALID_STATE);
    }

    if state.advertising == (AdvertisingState::Advertising { handle: adv_handle }) {
        debug!("GAP: Advertising set {} already running", adv_handle);
        return Ok(());
    }

    controller.start_advertising(adv_handle, CONN_CFG_TAG)?;
    state.advertising = AdvertisingState::Advertising { handle: adv_handle };
    info!("GAP: Advertising started on set {}", adv_handle);
    Ok(())
}

/// Stop advertising and drop the intent to advertise.
pub fn stop<C: Controller>(controller: &mut C, state: &mut DispatcherState) -> Result<(), ErrorCode> {
    match state.advertising {
        AdvertisingState::Idle => Ok(()),
        AdvertisingState::Advertising { handle } => {
            controller.stop_advertising(handle)?;
            state.advertising = AdvertisingState::Idle;
            info!("GAP: Advertising stopped on set {}", handle);
            Ok(())
        }
        AdvertisingState::Suspended { handle } => {
            // Controller already stopped when the connection formed
            state.advertising = AdvertisingState::Idle;
            debug!("GAP: Advertising set {} will not restart after disconnect", handle);
            Ok(())
        }
    }
}
