//! BLE Peripheral Implementation
//!
//! Resource configuration before the stack is enabled, then event dispatch
//! for a single-connection GAP peripheral and GATT server.

pub mod address;
pub mod advertising;
pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod resources;
pub mod state;
