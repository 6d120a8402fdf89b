use deku::{DekuRead, DekuWrite};

/// Length of the binary header in its wire form.
pub const BINARY_HEADER_LENGTH: usize = 48;

pub const FLAG_NONE: u32 = 0x00;
pub const FLAG_OLD_NONE: u32 = 0x0100_0000;
pub const FLAG_ACK: u32 = 0x02;
pub const FLAG_DATA: u32 = 0x20;
pub const FLAG_OLD_DATA: u32 = 0x0100_0030;
pub const FLAG_BYE_ACK: u32 = 0x40;

/// The 48 byte little endian header in front of every P2P message body.
#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct BinaryHeader {
    pub session_id: u32,
    pub identifier: u32,
    pub offset: u64,
    pub total_size: u64,
    pub length: u32,
    pub flag: u32,
    pub ack_identifier: u32,
    pub ack_unique_id: u32,
    pub ack_data_size: u64,
}

impl BinaryHeader {
    /// Old style flag values mean the same as their plain counterparts.
    pub fn is_control(&self) -> bool {
        self.flag == FLAG_NONE || self.flag == FLAG_OLD_NONE
    }

    pub fn is_ack(&self) -> bool {
        self.flag == FLAG_ACK
    }

    pub fn is_data(&self) -> bool {
        self.flag == FLAG_DATA || self.flag == FLAG_OLD_DATA
    }
}
