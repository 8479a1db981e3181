#![no_std]

//! nRF52820 S140 BLE Peripheral Core
//!
//! Event-driven control layer between the S140 SoftDevice and a
//! peripheral-role application, organized into two layers:
//!
//! - `core`: controller interface, resource configuration values, errors
//! - `ble`: resource configurator, event decoding and dispatch, connection
//!   and advertising state, write handler registry

pub mod ble;
pub mod core;
