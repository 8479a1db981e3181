//! BLE Event Decoding
//!
//! The SoftDevice writes each event into a word-aligned buffer laid out as
//! `ble_evt_t`: a 4-byte header (`evt_id`, `evt_len`) followed by a
//! per-category union. This module turns that layout into [`BleEvent`], one
//! variant per event kind the peripheral core reacts to.
//!
//! Ids and field offsets come from the SoftDevice bindings in
//! `nrf_softdevice::raw`, so they follow the linked SoftDevice headers.

use ::core::mem::{offset_of, size_of};

use defmt::Format;
use nrf_softdevice::raw;

use crate::ble::address::{Address, ADDRESS_RECORD_LEN};
use crate::ble::state::ConnectionHandle;

/// Event buffer size: event header and union plus the largest ATT MTU payload
pub const EVENT_BUFFER_LEN: usize = 544;

const HEADER_LEN: usize = size_of::<raw::ble_evt_hdr_t>();
/// Start of the per-category union
const EVT_OFFSET: usize = offset_of!(raw::ble_evt_t, evt);
const GAP_CONN_HANDLE: usize = EVT_OFFSET + offset_of!(raw::ble_gap_evt_t, conn_handle);
const GAP_PARAMS: usize = EVT_OFFSET + offset_of!(raw::ble_gap_evt_t, params);
const GATTS_CONN_HANDLE: usize = EVT_OFFSET + offset_of!(raw::ble_gatts_evt_t, conn_handle);
const GATTS_PARAMS: usize = EVT_OFFSET + offset_of!(raw::ble_gatts_evt_t, params);

/// `ble_gatts_evt_write_t` field offsets within params
const WRITE_HANDLE: usize = offset_of!(raw::ble_gatts_evt_write_t, handle);
const WRITE_OP: usize = offset_of!(raw::ble_gatts_evt_write_t, op);
const WRITE_OFFSET: usize = offset_of!(raw::ble_gatts_evt_write_t, offset);
const WRITE_LEN: usize = offset_of!(raw::ble_gatts_evt_write_t, len);
const WRITE_DATA: usize = offset_of!(raw::ble_gatts_evt_write_t, data);

const PEER_ADDR: usize = offset_of!(raw::ble_gap_evt_connected_t, peer_addr);
const DISCONNECT_REASON: usize = offset_of!(raw::ble_gap_evt_disconnected_t, reason);
const PEER_PREFERRED_PHYS: usize = offset_of!(raw::ble_gap_evt_phy_update_request_t, peer_preferred_phys);
const PHY_TX: usize = offset_of!(raw::ble_gap_phys_t, tx_phys);
const PHY_RX: usize = offset_of!(raw::ble_gap_phys_t, rx_phys);
const PHY_UPDATE_STATUS: usize = offset_of!(raw::ble_gap_evt_phy_update_t, status);
const PHY_UPDATE_TX: usize = offset_of!(raw::ble_gap_evt_phy_update_t, tx_phy);
const PHY_UPDATE_RX: usize = offset_of!(raw::ble_gap_evt_phy_update_t, rx_phy);
const DL_PEER_PARAMS: usize = offset_of!(raw::ble_gap_evt_data_length_update_request_t, peer_params);
const DL_EFFECTIVE_PARAMS: usize = offset_of!(raw::ble_gap_evt_data_length_update_t, effective_params);
const DL_MAX_TX_OCTETS: usize = offset_of!(raw::ble_gap_data_length_params_t, max_tx_octets);
const DL_MAX_RX_OCTETS: usize = offset_of!(raw::ble_gap_data_length_params_t, max_rx_octets);
const DL_MAX_TX_TIME: usize = offset_of!(raw::ble_gap_data_length_params_t, max_tx_time_us);
const DL_MAX_RX_TIME: usize = offset_of!(raw::ble_gap_data_length_params_t, max_rx_time_us);
const SYS_ATTR_HINT: usize = offset_of!(raw::ble_gatts_evt_sys_attr_missing_t, hint);
const CLIENT_RX_MTU: usize = offset_of!(raw::ble_gatts_evt_exchange_mtu_request_t, client_rx_mtu);
const HVN_COUNT: usize = offset_of!(raw::ble_gatts_evt_hvn_tx_complete_t, count);

/// Event ids (`BLE_GAP_EVTS` / `BLE_GATTS_EVTS` and their ranges)
pub mod evt_id {
    use nrf_softdevice::raw;

    pub const GAP_BASE: u16 = raw::BLE_GAP_EVT_BASE as u16;
    pub const GAP_LAST: u16 = raw::BLE_GAP_EVT_LAST as u16;
    pub const GAP_CONNECTED: u16 = raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONNECTED as u16;
    pub const GAP_DISCONNECTED: u16 = raw::BLE_GAP_EVTS_BLE_GAP_EVT_DISCONNECTED as u16;
    pub const GAP_CONN_PARAM_UPDATE: u16 = raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONN_PARAM_UPDATE as u16;
    pub const GAP_PHY_UPDATE_REQUEST: u16 = raw::BLE_GAP_EVTS_BLE_GAP_EVT_PHY_UPDATE_REQUEST as u16;
    pub const GAP_PHY_UPDATE: u16 = raw::BLE_GAP_EVTS_BLE_GAP_EVT_PHY_UPDATE as u16;
    pub const GAP_DATA_LENGTH_UPDATE_REQUEST: u16 = raw::BLE_GAP_EVTS_BLE_GAP_EVT_DATA_LENGTH_UPDATE_REQUEST as u16;
    pub const GAP_DATA_LENGTH_UPDATE: u16 = raw::BLE_GAP_EVTS_BLE_GAP_EVT_DATA_LENGTH_UPDATE as u16;

    pub const GATTS_BASE: u16 = raw::BLE_GATTS_EVT_BASE as u16;
    pub const GATTS_LAST: u16 = raw::BLE_GATTS_EVT_LAST as u16;
    pub const GATTS_WRITE: u16 = raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_WRITE as u16;
    pub const GATTS_SYS_ATTR_MISSING: u16 = raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_SYS_ATTR_MISSING as u16;
    pub const GATTS_EXCHANGE_MTU_REQUEST: u16 = raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_EXCHANGE_MTU_REQUEST as u16;
    pub const GATTS_HVN_TX_COMPLETE: u16 = raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_HVN_TX_COMPLETE as u16;
}

/// Shared buffer the controller copies events into
#[repr(C, align(4))]
pub struct EventBuffer {
    bytes: [u8; EVENT_BUFFER_LEN],
}

impl EventBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0; EVENT_BUFFER_LEN],
        }
    }

    pub fn capacity(&self) -> usize {
        EVENT_BUFFER_LEN
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The first `len` bytes, i.e. the event last written by the controller
    pub fn event(&self, len: usize) -> &[u8] {
        &self.bytes[..len.min(EVENT_BUFFER_LEN)]
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// PHY bitmasks (`BLE_GAP_PHY_*`) for each direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct PhyPreference {
    pub tx_phys: u8,
    pub rx_phys: u8,
}

/// `ble_gap_data_length_params_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct DataLengthParams {
    pub max_tx_octets: u16,
    pub max_rx_octets: u16,
    pub max_tx_time_us: u16,
    pub max_rx_time_us: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum GapEvent {
    Connected { peer: Address },
    Disconnected { reason: u8 },
    DataLengthUpdateRequest { peer_params: DataLengthParams },
    DataLengthUpdate { effective_params: DataLengthParams },
    PhyUpdateRequest { peer_preferred: PhyPreference },
    PhyUpdate { status: u8, tx_phy: u8, rx_phy: u8 },
    /// GAP event the peripheral core has no use for
    Other(u16),
}

/// Attribute write. `data` borrows the event buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct WriteEvent<'a> {
    pub handle: u16,
    pub op: u8,
    pub offset: u16,
    pub len: u16,
    /// The `len - offset` written bytes, starting at the first byte of the
    /// data array
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum GattsEvent<'a> {
    Write(WriteEvent<'a>),
    SysAttrMissing { hint: u8 },
    ExchangeMtuRequest { client_rx_mtu: u16 },
    HvnTxComplete { count: u8 },
    /// GATT server event the peripheral core has no use for
    Other(u16),
}

/// One decoded controller event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum BleEvent<'a> {
    Gap { conn_handle: ConnectionHandle, event: GapEvent },
    Gatts { conn_handle: ConnectionHandle, event: GattsEvent<'a> },
    /// Id outside every range handled here
    Unknown(u16),
}

/// Events the controller produced but that cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum DecodeError {
    /// Fewer bytes than an event header
    MissingHeader,
    /// Event shorter than its kind's fixed layout
    Truncated { id: u16 },
    /// Write whose offset lies past its length
    InvalidWrite { handle: u16 },
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

fn read_data_length(params: &[u8], at: usize) -> Option<DataLengthParams> {
    Some(DataLengthParams {
        max_tx_octets: read_u16(params, at + DL_MAX_TX_OCTETS)?,
        max_rx_octets: read_u16(params, at + DL_MAX_RX_OCTETS)?,
        max_tx_time_us: read_u16(params, at + DL_MAX_TX_TIME)?,
        max_rx_time_us: read_u16(params, at + DL_MAX_RX_TIME)?,
    })
}

impl<'a> BleEvent<'a> {
    /// Decode one event from the bytes the controller wrote
    pub fn decode(buf: &'a [u8]) -> Result<BleEvent<'a>, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::MissingHeader);
        }
        let id = u16::from_le_bytes([buf[0], buf[1]]);

        match id {
            evt_id::GAP_BASE..=evt_id::GAP_LAST => {
                let (conn_handle, params) = split_conn_event(buf, id, GAP_CONN_HANDLE, GAP_PARAMS)?;
                let event = decode_gap(id, params).ok_or(DecodeError::Truncated { id })?;
                Ok(BleEvent::Gap { conn_handle, event })
            }
            evt_id::GATTS_BASE..=evt_id::GATTS_LAST => {
                let (conn_handle, params) = split_conn_event(buf, id, GATTS_CONN_HANDLE, GATTS_PARAMS)?;
                let event = decode_gatts(id, params)?;
                Ok(BleEvent::Gatts { conn_handle, event })
            }
            _ => Ok(BleEvent::Unknown(id)),
        }
    }
}

fn split_conn_event(
    buf: &[u8],
    id: u16,
    conn_handle_at: usize,
    params_at: usize,
) -> Result<(ConnectionHandle, &[u8]), DecodeError> {
    let handle = read_u16(buf, conn_handle_at).ok_or(DecodeError::Truncated { id })?;
    let params = buf.get(params_at..).ok_or(DecodeError::Truncated { id })?;
    Ok((ConnectionHandle(handle), params))
}

fn decode_gap(id: u16, params: &[u8]) -> Option<GapEvent> {
    let event = match id {
        evt_id::GAP_CONNECTED => {
            let record: &[u8; ADDRESS_RECORD_LEN] = params
                .get(PEER_ADDR..PEER_ADDR + ADDRESS_RECORD_LEN)?
                .try_into()
                .ok()?;
            GapEvent::Connected {
                peer: Address::from_record(record),
            }
        }
        evt_id::GAP_DISCONNECTED => GapEvent::Disconnected {
            reason: read_u8(params, DISCONNECT_REASON)?,
        },
        evt_id::GAP_DATA_LENGTH_UPDATE_REQUEST => GapEvent::DataLengthUpdateRequest {
            peer_params: read_data_length(params, DL_PEER_PARAMS)?,
        },
        evt_id::GAP_DATA_LENGTH_UPDATE => GapEvent::DataLengthUpdate {
            effective_params: read_data_length(params, DL_EFFECTIVE_PARAMS)?,
        },
        evt_id::GAP_PHY_UPDATE_REQUEST => GapEvent::PhyUpdateRequest {
            peer_preferred: PhyPreference {
                tx_phys: read_u8(params, PEER_PREFERRED_PHYS + PHY_TX)?,
                rx_phys: read_u8(params, PEER_PREFERRED_PHYS + PHY_RX)?,
            },
        },
        evt_id::GAP_PHY_UPDATE => GapEvent::PhyUpdate {
            status: read_u8(params, PHY_UPDATE_STATUS)?,
            tx_phy: read_u8(params, PHY_UPDATE_TX)?,
            rx_phy: read_u8(params, PHY_UPDATE_RX)?,
        },
        other => GapEvent::Other(other),
    };
    Some(event)
}

fn decode_gatts(id: u16, params: &[u8]) -> Result<GattsEvent<'_>, DecodeError> {
    let truncated = DecodeError::Truncated { id };
    let event = match id {
        evt_id::GATTS_WRITE => GattsEvent::Write(decode_write(id, params)?),
        evt_id::GATTS_SYS_ATTR_MISSING => GattsEvent::SysAttrMissing {
            hint: read_u8(params, SYS_ATTR_HINT).ok_or(truncated)?,
        },
        evt_id::GATTS_EXCHANGE_MTU_REQUEST => GattsEvent::ExchangeMtuRequest {
            client_rx_mtu: read_u16(params, CLIENT_RX_MTU).ok_or(truncated)?,
        },
        evt_id::GATTS_HVN_TX_COMPLETE => GattsEvent::HvnTxComplete {
            count: read_u8(params, HVN_COUNT).ok_or(truncated)?,
        },
        other => GattsEvent::Other(other),
    };
    Ok(event)
}

/// The written value is the `len - offset` bytes at the start of the data
/// array; `offset` tells where in the attribute value they land.
fn decode_write(id: u16, params: &[u8]) -> Result<WriteEvent<'_>, DecodeError> {
    let truncated = DecodeError::Truncated { id };
    let handle = read_u16(params, WRITE_HANDLE).ok_or(truncated)?;
    let op = read_u8(params, WRITE_OP).ok_or(truncated)?;
    let offset = read_u16(params, WRITE_OFFSET).ok_or(truncated)?;
    let len = read_u16(params, WRITE_LEN).ok_or(truncated)?;

    if offset > len {
        return Err(DecodeError::InvalidWrite { handle });
    }

    let data_len = (len - offset) as usize;
    let data = params.get(WRITE_DATA..WRITE_DATA + data_len).ok_or(truncated)?;

    Ok(WriteEvent {
        handle,
        op,
        offset,
        len,
        data,
    })
}
