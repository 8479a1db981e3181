//! Controller Resource Configuration
//!
//! One-shot sequence run before the BLE stack is enabled: read the
//! application RAM base, submit the per-connection GAP/GATT/L2CAP
//! configuration tagged with [`CONN_CFG_TAG`], then enable the stack.
//!
//! The submission order is part of the contract with the controller build:
//! the wrong order is not rejected by the individual configuration calls but
//! makes the final enable fail. Nothing is retried; the first failure aborts
//! the sequence.

use defmt::{debug, error, info};

use crate::core::config::{Configuration, ControllerVariant, CONN_CFG_TAG};
use crate::core::controller::{Controller, RamBudget};
use crate::core::error::{ConfigError, ConfigStep, ControllerError, ErrorCode};

/// Order in which configuration items are submitted for a controller build
pub fn config_order(variant: ControllerVariant) -> &'static [ConfigStep] {
    match variant {
        ControllerVariant::PeripheralOnly => &[ConfigStep::Gap, ConfigStep::Gatt],
        ControllerVariant::Full => &[ConfigStep::Gatt, ConfigStep::L2cap, ConfigStep::Gap],
    }
}

/// Configure controller resources and enable the BLE stack.
///
/// Returns the RAM budget the controller settled on.
pub fn configure<C: Controller>(controller: &mut C, cfg: &Configuration) -> Result<RamBudget, ConfigError> {
    cfg.validate()?;

    let mut ram = controller
        .app_ram_base()
        .map_err(|code| fail(ConfigStep::ReadRamBase, code))?;
    debug!("CONFIG: Application RAM base {=u32:#x}", ram.0);

    for &step in config_order(cfg.variant) {
        submit(controller, cfg, step, &mut ram)?;
    }

    let requested = ram;
    if let Err(code) = controller.enable(&mut ram) {
        if code == ErrorCode::NO_MEM {
            error!(
                "CONFIG: Not enough RAM for the configured resources, RAM base must be {=u32:#x} (is {=u32:#x})",
                ram.0,
                requested.0
            );
        }
        return Err(fail(ConfigStep::Enable, code).into());
    }

    info!("CONFIG: BLE stack enabled, RAM base {=u32:#x}", ram.0);
    Ok(ram)
}

fn submit<C: Controller>(
    controller: &mut C,
    cfg: &Configuration,
    step: ConfigStep,
    ram: &mut RamBudget,
) -> Result<(), ControllerError> {
    let result = match step {
        ConfigStep::Gap => {
            debug!(
                "CONFIG: GAP conn_count={} event_length={}",
                cfg.gap.conn_count, cfg.gap.event_length
            );
            controller.set_gap_config(CONN_CFG_TAG, &cfg.gap, ram)
        }
        ConfigStep::Gatt => {
            debug!("CONFIG: GATT att_mtu={}", cfg.gatt.att_mtu);
            controller.set_gatt_config(CONN_CFG_TAG, &cfg.gatt, ram)
        }
        ConfigStep::L2cap => {
            debug!("CONFIG: L2CAP {}", cfg.l2cap);
            controller.set_l2cap_config(CONN_CFG_TAG, &cfg.l2cap, ram)
        }
        ConfigStep::ReadRamBase | ConfigStep::Enable => Ok(()),
    };
    result.map_err(|code| fail(step, code))
}

fn fail(step: ConfigStep, code: ErrorCode) -> ControllerError {
    error!("CONFIG: {} failed with error {}", step, code);
    ControllerError::new(step, code)
}
