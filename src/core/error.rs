//! Controller Error Taxonomy
//!
//! Every SoftDevice call returns a raw `u32` status. The configuration phase
//! turns a failing status into a [`ControllerError`] tagged with the step that
//! produced it; the dispatch phase only ever logs them.

use defmt::Format;
use nrf_softdevice::raw;

/// Raw status code returned by a controller call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const INTERNAL: Self = Self(raw::NRF_ERROR_INTERNAL);
    pub const NO_MEM: Self = Self(raw::NRF_ERROR_NO_MEM);
    pub const NOT_FOUND: Self = Self(raw::NRF_ERROR_NOT_FOUND);
    pub const INVALID_PARAM: Self = Self(raw::NRF_ERROR_INVALID_PARAM);
    pub const INVALID_STATE: Self = Self(raw::NRF_ERROR_INVALID_STATE);
    pub const INVALID_LENGTH: Self = Self(raw::NRF_ERROR_INVALID_LENGTH);
    pub const DATA_SIZE: Self = Self(raw::NRF_ERROR_DATA_SIZE);
    pub const BUSY: Self = Self(raw::NRF_ERROR_BUSY);

    /// Map a raw return value, `NRF_SUCCESS` being the only success
    pub fn check(ret: u32) -> Result<(), ErrorCode> {
        if ret == raw::NRF_SUCCESS {
            Ok(())
        } else {
            Err(ErrorCode(ret))
        }
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Step of the resource configuration sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum ConfigStep {
    ReadRamBase,
    Gap,
    Gatt,
    L2cap,
    Enable,
}

/// A configuration round-trip the controller rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct ControllerError {
    pub step: ConfigStep,
    pub code: ErrorCode,
}

impl ControllerError {
    pub const fn new(step: ConfigStep, code: ErrorCode) -> Self {
        Self { step, code }
    }
}

/// Configuration field rejected before anything reaches the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum ConfigParam {
    ConnCount,
    EventLength,
    AttMtu,
    L2capRxMps,
    L2capTxMps,
    L2capRxQueueSize,
    L2capTxQueueSize,
    L2capChCount,
}

/// Resource configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum ConfigError {
    InvalidParameter(ConfigParam),
    Controller(ControllerError),
}

impl From<ControllerError> for ConfigError {
    fn from(err: ControllerError) -> Self {
        ConfigError::Controller(err)
    }
}
