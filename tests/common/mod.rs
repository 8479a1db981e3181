//! Common test utilities and setup for embedded tests
//!
//! This module provides shared functionality for all defmt-test based tests:
//! - Global allocator for proptest
//! - A recording [`Controller`] standing in for the SoftDevice
//! - Builders for raw controller events
//! - Recorders for the connect and write callbacks

#![allow(dead_code)]

// Re-export commonly used items for tests (except conflicting macros)
pub use defmt_rtt as _; // global logger
// Also need the same embassy dependencies as the main firmware
pub use embassy_executor as _;
// Use nrf-softdevice which provides both interrupt vectors and critical section
pub use nrf_softdevice as _;
pub use panic_probe as _; // panic handler
pub use {embassy_nrf as _, embassy_time as _};

// Global allocator for proptest (required for alloc feature in no_std)
pub extern crate alloc;
use core::cell::RefCell;
use core::mem::offset_of;
use core::sync::atomic::{AtomicBool, Ordering};

use defmt::Format;
pub use embedded_alloc::LlffHeap as Heap;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{Deque, Vec};
use nrf_softdevice::raw;

use nrf52820_s140_peripheral::ble::address::Address;
use nrf52820_s140_peripheral::ble::events::{evt_id, EventBuffer, PhyPreference};
use nrf52820_s140_peripheral::ble::state::{ConnectionHandle, Device};
use nrf52820_s140_peripheral::core::config::{GapConfig, GattConfig, L2capConfig};
use nrf52820_s140_peripheral::core::controller::{Controller, RamBudget};
use nrf52820_s140_peripheral::core::error::{ConfigStep, ErrorCode};

#[global_allocator]
pub static HEAP: Heap = Heap::empty();

// Define the global allocator backing store - 8KB heap for proptest
pub static mut HEAP_MEM: [u8; 8192] = [0; 8192];

// Global flag to ensure heap is only initialized once
static HEAP_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Ensure heap is initialized exactly once
pub fn ensure_heap_initialized() {
    if !HEAP_INITIALIZED.swap(true, Ordering::Relaxed) {
        unsafe {
            let ptr = core::ptr::addr_of_mut!(HEAP_MEM) as *mut u8;
            HEAP.init(ptr as usize, 8192);
        }
    }
}

/// Application RAM base the mock reports
pub const MOCK_RAM_BASE: u32 = 0x2000_2000;

/// Amount the mock moves the RAM budget on every configuration call
pub const MOCK_RAM_STEP: u32 = 0x100;

/// Largest raw event the tests build
pub const MAX_TEST_EVENT: usize = 128;

pub type RawEvent = Vec<u8, MAX_TEST_EVENT>;

/// A command the mock controller received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Call {
    AppRamBase,
    GapConfig { tag: u8, conn_count: u8, event_length: u16, ram: u32 },
    GattConfig { tag: u8, att_mtu: u16, ram: u32 },
    L2capConfig { tag: u8, ch_count: u8, ram: u32 },
    Enable { ram: u32 },
    OwnAddress,
    ReplyDataLengthUpdate(ConnectionHandle),
    ReplyPhyUpdate(ConnectionHandle, PhyPreference),
    ReplyExchangeMtu(ConnectionHandle, u16),
    ReplySysAttrMissing(ConnectionHandle),
    StartAdvertising { handle: u8, tag: u8 },
    StopAdvertising(u8),
    AddService(u16),
    AddCharacteristic { service: u16, uuid: u16, max_len: u16 },
}

/// First attribute handle the mock hands out, past the built-in GAP/GATT services
pub const MOCK_FIRST_ATTR_HANDLE: u16 = 0x000C;

/// Recording controller with programmable failures
pub struct MockController {
    pub calls: Vec<Call, 32>,
    /// Configuration step that fails, and with which code
    pub fail_step: Option<(ConfigStep, ErrorCode)>,
    /// Code every negotiation reply fails with
    pub fail_replies: Option<ErrorCode>,
    pub fail_adv_start: Option<ErrorCode>,
    pub fail_attr_add: Option<ErrorCode>,
    pub next_attr_handle: u16,
    /// RAM base `enable` reports as required
    pub enable_requires: Option<u32>,
    pub address: Address,
    pub events: Deque<RawEvent, 8>,
}

impl MockController {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            fail_step: None,
            fail_replies: None,
            fail_adv_start: None,
            fail_attr_add: None,
            next_attr_handle: MOCK_FIRST_ATTR_HANDLE,
            enable_requires: None,
            address: Address::from_record(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            events: Deque::new(),
        }
    }

    fn record(&mut self, call: Call) {
        let _ = self.calls.push(call);
    }

    fn step(&mut self, step: ConfigStep, call: Call, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        self.record(call);
        if let Some((failing, code)) = self.fail_step {
            if failing == step {
                return Err(code);
            }
        }
        ram.0 += MOCK_RAM_STEP;
        Ok(())
    }

    fn reply(&mut self, call: Call) -> Result<(), ErrorCode> {
        self.record(call);
        match self.fail_replies {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn allocate_attr(&mut self, count: u16) -> Result<u16, ErrorCode> {
        if let Some(code) = self.fail_attr_add {
            return Err(code);
        }
        let handle = self.next_attr_handle;
        self.next_attr_handle += count;
        Ok(handle)
    }

    pub fn queue_event(&mut self, event: RawEvent) {
        let _ = self.events.push_back(event);
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|&c| matches(c)).count()
    }

    pub fn advertising_starts(&self) -> usize {
        self.count(|c| matches!(c, Call::StartAdvertising { .. }))
    }
}

impl Controller for MockController {
    fn app_ram_base(&mut self) -> Result<RamBudget, ErrorCode> {
        self.record(Call::AppRamBase);
        match self.fail_step {
            Some((ConfigStep::ReadRamBase, code)) => Err(code),
            _ => Ok(RamBudget(MOCK_RAM_BASE)),
        }
    }

    fn set_gap_config(&mut self, tag: u8, gap: &GapConfig, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        let call = Call::GapConfig {
            tag,
            conn_count: gap.conn_count,
            event_length: gap.event_length,
            ram: ram.0,
        };
        self.step(ConfigStep::Gap, call, ram)
    }

    fn set_gatt_config(&mut self, tag: u8, gatt: &GattConfig, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        let call = Call::GattConfig {
            tag,
            att_mtu: gatt.att_mtu,
            ram: ram.0,
        };
        self.step(ConfigStep::Gatt, call, ram)
    }

    fn set_l2cap_config(&mut self, tag: u8, l2cap: &L2capConfig, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        let call = Call::L2capConfig {
            tag,
            ch_count: l2cap.ch_count,
            ram: ram.0,
        };
        self.step(ConfigStep::L2cap, call, ram)
    }

    fn enable(&mut self, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        self.record(Call::Enable { ram: ram.0 });
        if let Some(required) = self.enable_requires {
            ram.0 = required;
        }
        match self.fail_step {
            Some((ConfigStep::Enable, code)) => Err(code),
            _ => Ok(()),
        }
    }

    fn own_address(&mut self) -> Result<Address, ErrorCode> {
        self.record(Call::OwnAddress);
        Ok(self.address)
    }

    fn reply_data_length_update(&mut self, conn: ConnectionHandle) -> Result<(), ErrorCode> {
        self.reply(Call::ReplyDataLengthUpdate(conn))
    }

    fn reply_phy_update(&mut self, conn: ConnectionHandle, phys: PhyPreference) -> Result<(), ErrorCode> {
        self.reply(Call::ReplyPhyUpdate(conn, phys))
    }

    fn reply_exchange_mtu(&mut self, conn: ConnectionHandle, mtu: u16) -> Result<(), ErrorCode> {
        self.reply(Call::ReplyExchangeMtu(conn, mtu))
    }

    fn reply_sys_attr_missing(&mut self, conn: ConnectionHandle) -> Result<(), ErrorCode> {
        self.reply(Call::ReplySysAttrMissing(conn))
    }

    fn start_advertising(&mut self, adv_handle: u8, tag: u8) -> Result<(), ErrorCode> {
        self.record(Call::StartAdvertising { handle: adv_handle, tag });
        match self.fail_adv_start {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn stop_advertising(&mut self, adv_handle: u8) -> Result<(), ErrorCode> {
        self.record(Call::StopAdvertising(adv_handle));
        Ok(())
    }

    fn add_service(&mut self, uuid: u16) -> Result<u16, ErrorCode> {
        self.record(Call::AddService(uuid));
        self.allocate_attr(1)
    }

    fn add_writable_characteristic(&mut self, service: u16, uuid: u16, max_len: u16) -> Result<u16, ErrorCode> {
        self.record(Call::AddCharacteristic { service, uuid, max_len });
        // Declaration first, then the value
        self.allocate_attr(2).map(|declaration| declaration + 1)
    }

    fn fetch_event(&mut self, buf: &mut EventBuffer) -> Result<Option<usize>, ErrorCode> {
        match self.events.pop_front() {
            Some(event) => {
                buf.bytes_mut()[..event.len()].copy_from_slice(&event);
                Ok(Some(event.len()))
            }
            None => Ok(None),
        }
    }
}

/// Start of the per-category union in `ble_evt_t`
const EVT_OFFSET: usize = offset_of!(raw::ble_evt_t, evt);

/// Byte position of a `ble_gatts_evt_write_t` field within a whole GATTS event
pub fn gatts_write_field(field_offset: usize) -> usize {
    EVT_OFFSET + offset_of!(raw::ble_gatts_evt_t, params) + field_offset
}

pub const WRITE_OFFSET_FIELD: usize = offset_of!(raw::ble_gatts_evt_write_t, offset);
pub const WRITE_LEN_FIELD: usize = offset_of!(raw::ble_gatts_evt_write_t, len);

/// Raw event laid out as `ble_evt_t`: header, then the GAP or GATTS event
/// (chosen by id) with `params` at the position the bindings give it
pub fn raw_event(id: u16, conn: u16, params: &[u8]) -> RawEvent {
    let (conn_at, params_at) = if (evt_id::GATTS_BASE..=evt_id::GATTS_LAST).contains(&id) {
        (
            EVT_OFFSET + offset_of!(raw::ble_gatts_evt_t, conn_handle),
            EVT_OFFSET + offset_of!(raw::ble_gatts_evt_t, params),
        )
    } else {
        (
            EVT_OFFSET + offset_of!(raw::ble_gap_evt_t, conn_handle),
            EVT_OFFSET + offset_of!(raw::ble_gap_evt_t, params),
        )
    };

    let mut event = RawEvent::new();
    event.resize(params_at + params.len(), 0).unwrap();
    let len = event.len() as u16;
    event[0..2].copy_from_slice(&id.to_le_bytes());
    event[2..4].copy_from_slice(&len.to_le_bytes());
    event[conn_at..conn_at + 2].copy_from_slice(&conn.to_le_bytes());
    event[params_at..].copy_from_slice(params);
    event
}

/// BLE_GAP_EVT_CONNECTED in the peripheral role
pub fn connected_event(conn: u16, addr: [u8; 6], addr_type: u8) -> RawEvent {
    let peer = offset_of!(raw::ble_gap_evt_connected_t, peer_addr);
    let role = offset_of!(raw::ble_gap_evt_connected_t, role);
    let mut params = [0u8; 16];
    params[peer] = addr_type << 1;
    params[peer + 1..peer + 7].copy_from_slice(&addr);
    params[role] = raw::BLE_GAP_ROLE_PERIPH as u8;
    raw_event(evt_id::GAP_CONNECTED, conn, &params[..role + 1])
}

pub fn disconnected_event(conn: u16, reason: u8) -> RawEvent {
    raw_event(evt_id::GAP_DISCONNECTED, conn, &[reason])
}

pub fn phy_update_request_event(conn: u16, tx_phys: u8, rx_phys: u8) -> RawEvent {
    raw_event(evt_id::GAP_PHY_UPDATE_REQUEST, conn, &[tx_phys, rx_phys])
}

pub fn phy_update_event(conn: u16, tx_phy: u8, rx_phy: u8) -> RawEvent {
    raw_event(evt_id::GAP_PHY_UPDATE, conn, &[0, tx_phy, rx_phy])
}

fn data_length_params(tx_octets: u16, rx_octets: u16) -> [u8; 8] {
    let mut params = [0u8; 8];
    params[0..2].copy_from_slice(&tx_octets.to_le_bytes());
    params[2..4].copy_from_slice(&rx_octets.to_le_bytes());
    params[4..6].copy_from_slice(&2120u16.to_le_bytes());
    params[6..8].copy_from_slice(&2120u16.to_le_bytes());
    params
}

pub fn data_length_update_request_event(conn: u16, tx_octets: u16, rx_octets: u16) -> RawEvent {
    raw_event(
        evt_id::GAP_DATA_LENGTH_UPDATE_REQUEST,
        conn,
        &data_length_params(tx_octets, rx_octets),
    )
}

pub fn data_length_update_event(conn: u16, tx_octets: u16, rx_octets: u16) -> RawEvent {
    raw_event(evt_id::GAP_DATA_LENGTH_UPDATE, conn, &data_length_params(tx_octets, rx_octets))
}

/// BLE_GATTS_EVT_WRITE carrying `data` at the start of its data array, with
/// the given `offset` and `len` fields
pub fn write_event_with_len(conn: u16, handle: u16, offset: u16, len: u16, data: &[u8]) -> RawEvent {
    let data_at = offset_of!(raw::ble_gatts_evt_write_t, data);
    let mut params: Vec<u8, MAX_TEST_EVENT> = Vec::new();
    params.resize(data_at, 0).unwrap();
    let handle_at = offset_of!(raw::ble_gatts_evt_write_t, handle);
    params[handle_at..handle_at + 2].copy_from_slice(&handle.to_le_bytes());
    params[offset_of!(raw::ble_gatts_evt_write_t, op)] = raw::BLE_GATTS_OP_WRITE_REQ as u8;
    params[WRITE_OFFSET_FIELD..WRITE_OFFSET_FIELD + 2].copy_from_slice(&offset.to_le_bytes());
    params[WRITE_LEN_FIELD..WRITE_LEN_FIELD + 2].copy_from_slice(&len.to_le_bytes());
    params.extend_from_slice(data).unwrap();
    raw_event(evt_id::GATTS_WRITE, conn, &params)
}

/// BLE_GATTS_EVT_WRITE of `data` landing at `offset` in the attribute value
/// (`len = offset + data.len()`)
pub fn write_event(conn: u16, handle: u16, offset: u16, data: &[u8]) -> RawEvent {
    write_event_with_len(conn, handle, offset, offset + data.len() as u16, data)
}

pub fn exchange_mtu_request_event(conn: u16, client_rx_mtu: u16) -> RawEvent {
    raw_event(evt_id::GATTS_EXCHANGE_MTU_REQUEST, conn, &client_rx_mtu.to_le_bytes())
}

pub fn sys_attr_missing_event(conn: u16) -> RawEvent {
    raw_event(evt_id::GATTS_SYS_ATTR_MISSING, conn, &[0])
}

pub fn hvn_tx_complete_event(conn: u16, count: u8) -> RawEvent {
    raw_event(evt_id::GATTS_HVN_TX_COMPLETE, conn, &[count])
}

/// Connect handler invocations, in order
static CONNECT_LOG: Mutex<CriticalSectionRawMutex, RefCell<Vec<(Device, bool), 8>>> =
    Mutex::new(RefCell::new(Vec::new()));

/// Write handler invocations: connection, offset and a copy of the data
pub type WriteRecord = (ConnectionHandle, u16, Vec<u8, 32>);

static WRITE_LOG: Mutex<CriticalSectionRawMutex, RefCell<Vec<WriteRecord, 8>>> =
    Mutex::new(RefCell::new(Vec::new()));

pub fn record_connect(device: Device, connected: bool) {
    CONNECT_LOG.lock(|log| {
        let _ = log.borrow_mut().push((device, connected));
    });
}

pub fn record_write(conn: ConnectionHandle, offset: u16, data: &[u8]) {
    let mut copy = Vec::new();
    let _ = copy.extend_from_slice(data);
    WRITE_LOG.lock(|log| {
        let _ = log.borrow_mut().push((conn, offset, copy));
    });
}

pub fn connect_log() -> Vec<(Device, bool), 8> {
    CONNECT_LOG.lock(|log| log.borrow().clone())
}

pub fn write_log() -> Vec<WriteRecord, 8> {
    WRITE_LOG.lock(|log| log.borrow().clone())
}

pub fn reset_logs() {
    CONNECT_LOG.lock(|log| log.borrow_mut().clear());
    WRITE_LOG.lock(|log| log.borrow_mut().clear());
}
