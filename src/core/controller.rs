//! Controller Command Interface
//!
//! Every synchronous command the core issues to the radio controller goes
//! through [`Controller`]. [`SoftdeviceController`] forwards them to the S140
//! SoftDevice; tests substitute a recording implementation.
//!
//! All calls are acknowledge-only: a successful return means the SoftDevice
//! accepted the command, the radio-level effect shows up later as an event.

use ::core::{mem, ptr};

use defmt::{debug, Format};
use nrf_softdevice::raw;

use crate::ble::address::Address;
use crate::ble::events::{EventBuffer, PhyPreference};
use crate::ble::state::ConnectionHandle;
use crate::core::config::{GapConfig, GattConfig, L2capConfig};
use crate::core::error::ErrorCode;

/// Application RAM boundary negotiated with the controller.
///
/// Starts at the linker-provided start of application RAM; the controller
/// may move it while resources are configured, so the value returned by one
/// call is what the next call must use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct RamBudget(pub u32);

/// Synchronous commands understood by the radio controller
pub trait Controller {
    /// Read the application RAM base the controller must not reserve past
    fn app_ram_base(&mut self) -> Result<RamBudget, ErrorCode>;

    fn set_gap_config(&mut self, tag: u8, gap: &GapConfig, ram: &mut RamBudget) -> Result<(), ErrorCode>;

    fn set_gatt_config(&mut self, tag: u8, gatt: &GattConfig, ram: &mut RamBudget) -> Result<(), ErrorCode>;

    fn set_l2cap_config(&mut self, tag: u8, l2cap: &L2capConfig, ram: &mut RamBudget) -> Result<(), ErrorCode>;

    /// Enable the BLE stack. On return `ram` holds the base the controller
    /// actually requires, also when it refused with `NO_MEM`.
    fn enable(&mut self, ram: &mut RamBudget) -> Result<(), ErrorCode>;

    fn own_address(&mut self) -> Result<Address, ErrorCode>;

    /// Answer a data length update request with the controller defaults
    fn reply_data_length_update(&mut self, conn: ConnectionHandle) -> Result<(), ErrorCode>;

    fn reply_phy_update(&mut self, conn: ConnectionHandle, phys: PhyPreference) -> Result<(), ErrorCode>;

    fn reply_exchange_mtu(&mut self, conn: ConnectionHandle, mtu: u16) -> Result<(), ErrorCode>;

    /// Tell the controller no system attributes are stored for this peer
    fn reply_sys_attr_missing(&mut self, conn: ConnectionHandle) -> Result<(), ErrorCode>;

    fn start_advertising(&mut self, adv_handle: u8, tag: u8) -> Result<(), ErrorCode>;

    fn stop_advertising(&mut self, adv_handle: u8) -> Result<(), ErrorCode>;

    /// Add a primary service with a 16-bit UUID, returning its handle
    fn add_service(&mut self, uuid: u16) -> Result<u16, ErrorCode>;

    /// Add a readable, writable characteristic to `service` whose value is
    /// kept by the controller and starts empty. Returns the value handle,
    /// which is the handle writes are reported with.
    fn add_writable_characteristic(&mut self, service: u16, uuid: u16, max_len: u16) -> Result<u16, ErrorCode>;

    /// Pull the next pending event into `buf`, `Ok(None)` once drained
    fn fetch_event(&mut self, buf: &mut EventBuffer) -> Result<Option<usize>, ErrorCode>;
}

extern "C" {
    /// Start of application RAM, provided by cortex-m-rt's link.x
    static mut __sdata: u32;
}

/// [`Controller`] backed by the S140 SoftDevice
pub struct SoftdeviceController {
    _private: (),
}

impl SoftdeviceController {
    /// The SoftDevice itself must be enabled before any command is accepted
    pub const fn new() -> Self {
        Self { _private: () }
    }

    fn conn_cfg(tag: u8, params: raw::ble_conn_cfg_t__bindgen_ty_1) -> raw::ble_cfg_t {
        raw::ble_cfg_t {
            conn_cfg: raw::ble_conn_cfg_t {
                conn_cfg_tag: tag,
                params,
            },
        }
    }

    fn cfg_set(id: u32, cfg: &raw::ble_cfg_t, ram: &RamBudget) -> Result<(), ErrorCode> {
        let ret = unsafe { raw::sd_ble_cfg_set(id, cfg, ram.0) };
        ErrorCode::check(ret)
    }

    /// Register a connectable, scannable undirected advertising set.
    ///
    /// The SoftDevice keeps pointers to both payloads for as long as the set
    /// exists, hence the `'static` bound. Returns the advertising handle.
    pub fn configure_advertising(
        &mut self,
        adv_data: &'static [u8],
        scan_data: &'static [u8],
        interval: u32,
    ) -> Result<u8, ErrorCode> {
        let mut params: raw::ble_gap_adv_params_t = unsafe { mem::zeroed() };
        params.properties.type_ = raw::BLE_GAP_ADV_TYPE_CONNECTABLE_SCANNABLE_UNDIRECTED as u8;
        params.primary_phy = raw::BLE_GAP_PHY_1MBPS as u8;
        params.secondary_phy = raw::BLE_GAP_PHY_1MBPS as u8;
        params.interval = interval;

        let data = raw::ble_gap_adv_data_t {
            adv_data: raw::ble_data_t {
                p_data: adv_data.as_ptr() as *mut u8,
                len: adv_data.len() as u16,
            },
            scan_rsp_data: raw::ble_data_t {
                p_data: scan_data.as_ptr() as *mut u8,
                len: scan_data.len() as u16,
            },
        };

        let mut handle = raw::BLE_GAP_ADV_SET_HANDLE_NOT_SET as u8;
        let ret = unsafe { raw::sd_ble_gap_adv_set_configure(&mut handle, &data, &params) };
        ErrorCode::check(ret)?;

        debug!("GAP: Advertising set configured with handle {}", handle);
        Ok(handle)
    }
}

impl Default for SoftdeviceController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for SoftdeviceController {
    fn app_ram_base(&mut self) -> Result<RamBudget, ErrorCode> {
        let base = unsafe { ptr::addr_of!(__sdata) as u32 };
        Ok(RamBudget(base))
    }

    fn set_gap_config(&mut self, tag: u8, gap: &GapConfig, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        let cfg = Self::conn_cfg(
            tag,
            raw::ble_conn_cfg_t__bindgen_ty_1 {
                gap_conn_cfg: raw::ble_gap_conn_cfg_t {
                    conn_count: gap.conn_count,
                    event_length: gap.event_length,
                },
            },
        );
        Self::cfg_set(raw::BLE_CONN_CFGS_BLE_CONN_CFG_GAP, &cfg, ram)
    }

    fn set_gatt_config(&mut self, tag: u8, gatt: &GattConfig, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        let cfg = Self::conn_cfg(
            tag,
            raw::ble_conn_cfg_t__bindgen_ty_1 {
                gatt_conn_cfg: raw::ble_gatt_conn_cfg_t { att_mtu: gatt.att_mtu },
            },
        );
        Self::cfg_set(raw::BLE_CONN_CFGS_BLE_CONN_CFG_GATT, &cfg, ram)
    }

    fn set_l2cap_config(&mut self, tag: u8, l2cap: &L2capConfig, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        let cfg = Self::conn_cfg(
            tag,
            raw::ble_conn_cfg_t__bindgen_ty_1 {
                l2cap_conn_cfg: raw::ble_l2cap_conn_cfg_t {
                    rx_mps: l2cap.rx_mps,
                    tx_mps: l2cap.tx_mps,
                    rx_queue_size: l2cap.rx_queue_size,
                    tx_queue_size: l2cap.tx_queue_size,
                    ch_count: l2cap.ch_count,
                },
            },
        );
        Self::cfg_set(raw::BLE_CONN_CFGS_BLE_CONN_CFG_L2CAP, &cfg, ram)
    }

    fn enable(&mut self, ram: &mut RamBudget) -> Result<(), ErrorCode> {
        let ret = unsafe { raw::sd_ble_enable(&mut ram.0) };
        ErrorCode::check(ret)
    }

    fn own_address(&mut self) -> Result<Address, ErrorCode> {
        let mut addr: raw::ble_gap_addr_t = unsafe { mem::zeroed() };
        let ret = unsafe { raw::sd_ble_gap_addr_get(&mut addr) };
        ErrorCode::check(ret)?;
        let addr = unsafe { nrf_softdevice::ble::Address::from_raw(addr) };
        Ok(Address::from(addr))
    }

    fn reply_data_length_update(&mut self, conn: ConnectionHandle) -> Result<(), ErrorCode> {
        // Null parameters select the controller defaults
        let ret = unsafe { raw::sd_ble_gap_data_length_update(conn.raw(), ptr::null(), ptr::null_mut()) };
        ErrorCode::check(ret)
    }

    fn reply_phy_update(&mut self, conn: ConnectionHandle, phys: PhyPreference) -> Result<(), ErrorCode> {
        let phys = raw::ble_gap_phys_t {
            tx_phys: phys.tx_phys,
            rx_phys: phys.rx_phys,
        };
        let ret = unsafe { raw::sd_ble_gap_phy_update(conn.raw(), &phys) };
        ErrorCode::check(ret)
    }

    fn reply_exchange_mtu(&mut self, conn: ConnectionHandle, mtu: u16) -> Result<(), ErrorCode> {
        let ret = unsafe { raw::sd_ble_gatts_exchange_mtu_reply(conn.raw(), mtu) };
        ErrorCode::check(ret)
    }

    fn reply_sys_attr_missing(&mut self, conn: ConnectionHandle) -> Result<(), ErrorCode> {
        let ret = unsafe { raw::sd_ble_gatts_sys_attr_set(conn.raw(), ptr::null(), 0, 0) };
        ErrorCode::check(ret)
    }

    fn start_advertising(&mut self, adv_handle: u8, tag: u8) -> Result<(), ErrorCode> {
        let ret = unsafe { raw::sd_ble_gap_adv_start(adv_handle, tag) };
        ErrorCode::check(ret)
    }

    fn stop_advertising(&mut self, adv_handle: u8) -> Result<(), ErrorCode> {
        let ret = unsafe { raw::sd_ble_gap_adv_stop(adv_handle) };
        ErrorCode::check(ret)
    }

    fn add_service(&mut self, uuid: u16) -> Result<u16, ErrorCode> {
        let uuid = raw::ble_uuid_t {
            uuid,
            type_: raw::BLE_UUID_TYPE_BLE as u8,
        };
        let mut handle = 0u16;
        let ret = unsafe { raw::sd_ble_gatts_service_add(raw::BLE_GATTS_SRVC_TYPE_PRIMARY as u8, &uuid, &mut handle) };
        ErrorCode::check(ret)?;

        debug!("GATTS: Service {=u16:#x} added with handle {}", uuid.uuid, handle);
        Ok(handle)
    }

    fn add_writable_characteristic(&mut self, service: u16, uuid: u16, max_len: u16) -> Result<u16, ErrorCode> {
        let uuid = raw::ble_uuid_t {
            uuid,
            type_: raw::BLE_UUID_TYPE_BLE as u8,
        };

        // Open security mode (1, 1) for both directions
        let mut attr_md: raw::ble_gatts_attr_md_t = unsafe { mem::zeroed() };
        attr_md.read_perm.set_sm(1);
        attr_md.read_perm.set_lv(1);
        attr_md.write_perm.set_sm(1);
        attr_md.write_perm.set_lv(1);
        attr_md.set_vloc(raw::BLE_GATTS_VLOC_STACK as u8);
        attr_md.set_vlen(1);

        let mut char_md: raw::ble_gatts_char_md_t = unsafe { mem::zeroed() };
        char_md.char_props.set_read(1);
        char_md.char_props.set_write(1);
        char_md.char_props.set_write_wo_resp(1);

        let attr = raw::ble_gatts_attr_t {
            p_uuid: &uuid,
            p_attr_md: &attr_md,
            init_len: 0,
            init_offs: 0,
            max_len,
            p_value: ptr::null_mut(),
        };

        let mut handles: raw::ble_gatts_char_handles_t = unsafe { mem::zeroed() };
        let ret = unsafe { raw::sd_ble_gatts_characteristic_add(service, &char_md, &attr, &mut handles) };
        ErrorCode::check(ret)?;

        debug!(
            "GATTS: Characteristic {=u16:#x} added with value handle {}",
            uuid.uuid, handles.value_handle
        );
        Ok(handles.value_handle)
    }

    fn fetch_event(&mut self, buf: &mut EventBuffer) -> Result<Option<usize>, ErrorCode> {
        let mut len = buf.capacity() as u16;
        let ret = unsafe { raw::sd_ble_evt_get(buf.as_mut_ptr(), &mut len) };
        match ErrorCode::check(ret) {
            Ok(()) => Ok(Some(len as usize)),
            Err(ErrorCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
