use crate::p2p_error::P2pError;
use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Room reserved for the UTF-16 file name, in bytes.
const FILE_NAME_LENGTH: usize = 0x226;

const HEADER_LENGTH: usize = 20;
const CONTEXT_LENGTH: usize = HEADER_LENGTH + FILE_NAME_LENGTH + 4;

/// The file description blob carried in a file transfer invitation,
/// base64 encoded inside the Context property.
///
/// Layout: five u32 little endian fields (total length, version 2, file
/// size, 0, 0), the file name as NUL padded UTF-16LE, and four 0xFF
/// bytes at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContext {
    pub file_name: String,
    pub file_size: u64,
}

impl FileContext {
    pub fn new(file_name: &str, file_size: u64) -> Self {
        Self {
            file_name: file_name.to_string(),
            file_size,
        }
    }

    pub fn encode(&self) -> String {
        let mut blob = vec![0u8; CONTEXT_LENGTH];
        blob[0..4].copy_from_slice(&(CONTEXT_LENGTH as u32).to_le_bytes());
        blob[4..8].copy_from_slice(&2u32.to_le_bytes());
        blob[8..12].copy_from_slice(&(self.file_size as u32).to_le_bytes());

        let mut cursor = HEADER_LENGTH;
        for unit in self.file_name.encode_utf16() {
            if cursor + 2 > HEADER_LENGTH + FILE_NAME_LENGTH {
                break;
            }

            blob[cursor..cursor + 2].copy_from_slice(&unit.to_le_bytes());
            cursor += 2;
        }

        blob[CONTEXT_LENGTH - 4..].copy_from_slice(&[0xFF; 4]);
        STANDARD.encode(&blob)
    }

    pub fn decode(encoded: &str) -> Result<Self, P2pError> {
        let blob = STANDARD
            .decode(encoded)
            .or(Err(P2pError::InvalidContext))?;

        if blob.len() < HEADER_LENGTH {
            return Err(P2pError::InvalidContext);
        }

        let mut file_size = [0u8; 4];
        file_size.copy_from_slice(&blob[8..12]);
        let file_size = u32::from_le_bytes(file_size) as u64;

        let name_end = blob.len().min(HEADER_LENGTH + FILE_NAME_LENGTH);
        let units: Vec<u16> = blob[HEADER_LENGTH..name_end]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect();

        let file_name = String::from_utf16(&units).or(Err(P2pError::InvalidContext))?;

        Ok(Self {
            file_name,
            file_size,
        })
    }
}
