use crate::p2p_error::P2pError;
use crate::sdk_error::SdkError;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// Serializable msnobject representing data like display pictures.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename = "msnobj")]
pub struct MsnObject {
    #[serde(rename = "@Creator")]
    pub creator: String,
    #[serde(rename = "@Size")]
    pub size: u32,
    #[serde(rename = "@Type")]
    pub object_type: u16,
    #[serde(rename = "@Location")]
    pub location: String,
    #[serde(rename = "@Friendly")]
    pub friendly: String,
    #[serde(rename = "@SHA1D")]
    pub sha1d: String,
    #[serde(rename = "@SHA1C")]
    pub sha1c: String,
}

impl MsnObject {
    /// Builds the descriptor of a display picture owned by `creator`.
    pub fn for_display_picture(creator: &str, data: &[u8]) -> Self {
        let mut hash = sha1_smol::Sha1::new();
        hash.update(data);
        let sha1d = STANDARD.encode(hash.digest().bytes());

        let sha1c = format!(
            "Creator{creator}Size{}Type3LocationPIC.tmpFriendlyAAA=SHA1D{sha1d}",
            data.len()
        );

        let mut hash = sha1_smol::Sha1::new();
        hash.update(sha1c.as_bytes());
        let sha1c = STANDARD.encode(hash.digest().bytes());

        Self {
            creator: creator.to_string(),
            size: data.len() as u32,
            object_type: 3,
            location: "PIC.tmp".to_string(),
            friendly: "AAA=".to_string(),
            sha1d,
            sha1c,
        }
    }

    pub fn to_xml(&self) -> Result<String, SdkError> {
        quick_xml::se::to_string(self).or(Err(SdkError::InvalidArgument))
    }

    /// Parses the descriptor out of an invitation context. Trailing NULs
    /// from the base64 blob are tolerated.
    pub fn from_xml(xml: &str) -> Result<Self, P2pError> {
        quick_xml::de::from_str(xml.trim_end_matches('\0')).or(Err(P2pError::InvalidContext))
    }
}
