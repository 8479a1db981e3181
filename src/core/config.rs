//! Controller Resource Configuration
//!
//! Static resource configuration handed to the SoftDevice before the BLE
//! stack is enabled. Values are fixed once at start-up and never change
//! afterwards.

use defmt::Format;

use crate::core::error::{ConfigError, ConfigParam};

/// Tag binding the connection configuration to the advertisement that uses it.
/// `start_advertising` must pass the same tag.
pub const CONN_CFG_TAG: u8 = 1;

/// Only a single simultaneous connection is supported
pub const MAX_CONNECTIONS: u8 = 1;

/// Default ATT MTU (Bluetooth Core Spec minimum)
pub const ATT_MTU_DEFAULT: u16 = 23;

/// Largest ATT MTU accepted in the configuration and in MTU exchanges
pub const ATT_MTU_MAX: u16 = 515;

/// L2CAP channel counts above this have destabilised the controller
pub const L2CAP_CH_COUNT_MAX: u8 = 18;

/// Submission order expected by the controller build's RAM accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum ControllerVariant {
    /// Peripheral-only build without L2CAP channels (S113 style): GAP, GATT
    PeripheralOnly,
    /// Full build (S140 style): GATT, L2CAP, GAP
    Full,
}

/// GAP connection configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct GapConfig {
    pub conn_count: u8,
    /// Connection event length in 1.25 ms units
    pub event_length: u16,
}

/// GATT connection configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct GattConfig {
    pub att_mtu: u16,
}

/// L2CAP connection configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct L2capConfig {
    pub rx_mps: u16,
    pub tx_mps: u16,
    pub rx_queue_size: u8,
    pub tx_queue_size: u8,
    pub ch_count: u8,
}

/// Complete controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct Configuration {
    pub variant: ControllerVariant,
    pub gap: GapConfig,
    pub gatt: GattConfig,
    pub l2cap: L2capConfig,
}

impl Configuration {
    pub const fn new() -> Self {
        Self {
            variant: ControllerVariant::Full,
            gap: GapConfig {
                conn_count: MAX_CONNECTIONS,
                event_length: 24, // 30ms
            },
            gatt: GattConfig { att_mtu: 247 },
            l2cap: L2capConfig {
                rx_mps: 247,
                tx_mps: 247,
                rx_queue_size: 1,
                tx_queue_size: 1,
                ch_count: 1,
            },
        }
    }

    /// Whether this build submits the L2CAP configuration at all
    pub fn submits_l2cap(&self) -> bool {
        self.variant == ControllerVariant::Full
    }

    /// Reject values the controller must never see
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gap.conn_count != MAX_CONNECTIONS {
            return Err(ConfigError::InvalidParameter(ConfigParam::ConnCount));
        }
        if self.gap.event_length == 0 {
            return Err(ConfigError::InvalidParameter(ConfigParam::EventLength));
        }
        if !(ATT_MTU_DEFAULT..=ATT_MTU_MAX).contains(&self.gatt.att_mtu) {
            return Err(ConfigError::InvalidParameter(ConfigParam::AttMtu));
        }

        if self.submits_l2cap() {
            let l2cap = &self.l2cap;
            if l2cap.rx_mps == 0 {
                return Err(ConfigError::InvalidParameter(ConfigParam::L2capRxMps));
            }
            if l2cap.tx_mps == 0 {
                return Err(ConfigError::InvalidParameter(ConfigParam::L2capTxMps));
            }
            if l2cap.rx_queue_size == 0 {
                return Err(ConfigError::InvalidParameter(ConfigParam::L2capRxQueueSize));
            }
            if l2cap.tx_queue_size == 0 {
                return Err(ConfigError::InvalidParameter(ConfigParam::L2capTxQueueSize));
            }
            // Hard bound, not a recommendation
            if l2cap.ch_count > L2CAP_CH_COUNT_MAX {
                return Err(ConfigError::InvalidParameter(ConfigParam::L2capChCount));
            }
        }

        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
