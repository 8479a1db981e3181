#![no_std]
#![no_main]

use defmt::*;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::{config::Config, interrupt};
use embassy_time::{Duration, Timer};
use nrf_softdevice::ble::advertisement_builder::{Flag, LegacyAdvertisementBuilder, LegacyAdvertisementPayload};
use nrf_softdevice::raw;
use panic_probe as _;

use nrf52820_s140_peripheral::ble::advertising;
use nrf52820_s140_peripheral::ble::dispatcher::Dispatcher;
use nrf52820_s140_peripheral::ble::events::EventBuffer;
use nrf52820_s140_peripheral::ble::registry::{MAX_WRITE_HANDLERS, WRITE_HANDLERS};
use nrf52820_s140_peripheral::ble::resources;
use nrf52820_s140_peripheral::ble::state::{ConnectionHandle, Device, DispatcherState};
use nrf52820_s140_peripheral::core::config::Configuration;
use nrf52820_s140_peripheral::core::controller::{Controller, SoftdeviceController};

/// Demo service and its writable characteristic (16-bit vendor UUIDs)
const DEMO_SERVICE_UUID: u16 = 0xFFE0;
const DEMO_CHAR_UUID: u16 = 0xFFE1;
const DEMO_CHAR_MAX_LEN: u16 = 64;

/// Advertising interval in 0.625 ms units (250ms)
const ADV_INTERVAL: u32 = 400;

/// Event pump poll period while the controller is idle
const PUMP_PERIOD: Duration = Duration::from_millis(5);

static ADV_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
    .full_name("BLE_Peripheral")
    .build();

static SCAN_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new().build();

type Ble = Dispatcher<'static, SoftdeviceController, MAX_WRITE_HANDLERS>;

unsafe extern "C" fn fault_handler(id: u32, pc: u32, info: u32) {
    defmt::panic!("SoftDevice fault: id={=u32:#x} pc={=u32:#x} info={=u32:#x}", id, pc, info);
}

fn on_connect(device: Device, connected: bool) {
    if connected {
        info!("APP: Peer connected: {}", device);
    } else {
        info!("APP: Peer disconnected: {}", device.handle);
    }
}

fn on_demo_write(conn: ConnectionHandle, offset: u16, data: &[u8]) {
    info!("APP: Write on {} at offset {}: {=[u8]:x}", conn, offset, data);
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting nRF52820 S140 peripheral");

    // Configure interrupt priorities to avoid SoftDevice reserved levels (0, 1, 4)
    let mut nrf_config = Config::default();
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let _peripherals = embassy_nrf::init(nrf_config);

    let clock = raw::nrf_clock_lf_cfg_t {
        source: raw::NRF_CLOCK_LF_SRC_RC as u8,
        rc_ctiv: 16,
        rc_temp_ctiv: 2,
        accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
    };
    let ret = unsafe { raw::sd_softdevice_enable(&clock, Some(fault_handler)) };
    if ret != raw::NRF_SUCCESS {
        defmt::panic!("SoftDevice enable failed: {}", ret);
    }

    let cfg = Configuration::default();
    let mut controller = SoftdeviceController::new();
    if let Err(e) = resources::configure(&mut controller, &cfg) {
        defmt::panic!("BLE resource configuration failed: {}", e);
    }

    match controller.own_address() {
        Ok(addr) => info!("Own address: {}", addr),
        Err(e) => warn!("Failed to read own address: {}", e),
    }

    match controller.add_service(DEMO_SERVICE_UUID) {
        Ok(service) => {
            if let Err(e) = WRITE_HANDLERS.add_characteristic(
                &mut controller,
                service,
                DEMO_CHAR_UUID,
                DEMO_CHAR_MAX_LEN,
                on_demo_write,
            ) {
                warn!("Demo characteristic not available: {}", e);
            }
        }
        Err(e) => warn!("Failed to add demo service: {}", e),
    }

    let adv_handle = unwrap!(controller.configure_advertising(&ADV_DATA, &SCAN_DATA, ADV_INTERVAL));

    let mut state = DispatcherState::new();
    let mut ble = Dispatcher::new(controller, &cfg, &WRITE_HANDLERS);
    ble.set_connect_handler(on_connect);

    if let Err(e) = advertising::start(ble.controller_mut(), &mut state, adv_handle) {
        defmt::panic!("Failed to start advertising: {}", e);
    }

    unwrap!(spawner.spawn(ble_task(ble, state)));
}

#[embassy_executor::task]
async fn ble_task(mut ble: Ble, mut state: DispatcherState) -> ! {
    static mut EVENT_BUFFER: EventBuffer = EventBuffer::new();
    // Only this task touches the buffer
    let buf = unsafe { &mut *core::ptr::addr_of_mut!(EVENT_BUFFER) };

    loop {
        if ble.pump(&mut state, buf) == 0 {
            Timer::after(PUMP_PERIOD).await;
        } else {
            // Let other tasks run between bursts
            embassy_futures::yield_now().await;
        }
    }
}
