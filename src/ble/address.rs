//! Peer and local device addresses.

use defmt::Format;

/// Length of a controller address record: one type byte plus six address bytes
pub const ADDRESS_RECORD_LEN: usize = ::core::mem::size_of::<nrf_softdevice::raw::ble_gap_addr_t>();

/// Whether an address is the public (IEEE assigned) one or a random one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum AddressKind {
    Public,
    Random,
}

/// Host-side device address.
///
/// `bytes` is kept in controller order, least significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub bytes: [u8; 6],
    pub kind: AddressKind,
}

impl Address {
    pub const fn new(bytes: [u8; 6], kind: AddressKind) -> Self {
        Self { bytes, kind }
    }

    /// Decode a `ble_gap_addr_t` record.
    ///
    /// Byte 0 holds the resolved-identity flag in bit 0 and the address type
    /// in bits 1..7; any type other than public counts as random.
    pub fn from_record(record: &[u8; ADDRESS_RECORD_LEN]) -> Self {
        let addr_type = record[0] >> 1;
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&record[1..]);
        Self {
            bytes,
            kind: if addr_type != 0 {
                AddressKind::Random
            } else {
                AddressKind::Public
            },
        }
    }

    pub fn is_random(&self) -> bool {
        self.kind == AddressKind::Random
    }
}

impl From<nrf_softdevice::ble::Address> for Address {
    fn from(addr: nrf_softdevice::ble::Address) -> Self {
        let mut record = [0u8; ADDRESS_RECORD_LEN];
        record[0] = addr.flags;
        record[1..].copy_from_slice(&addr.bytes());
        Self::from_record(&record)
    }
}

impl Format for Address {
    fn format(&self, fmt: defmt::Formatter) {
        let b = &self.bytes;
        defmt::write!(
            fmt,
            "{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X} ({})",
            b[5],
            b[4],
            b[3],
            b[2],
            b[1],
            b[0],
            self.kind
        )
    }
}
