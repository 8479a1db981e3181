//! Core System Infrastructure
//!
//! Controller command interface, static configuration and the error
//! taxonomy shared by the BLE layer.

pub mod config;
pub mod controller;
pub mod error;
