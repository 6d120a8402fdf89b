use crate::command::message::OutgoingMessage;
use crate::p2p::binary_header::{BINARY_HEADER_LENGTH, BinaryHeader, FLAG_ACK};
use crate::p2p_error::P2pError;
use core::str;
use deku::{DekuContainerRead, DekuContainerWrite};
use std::io::Cursor;

/// Largest body a single P2P message may carry. Bigger payloads are
/// split into several messages sharing one identifier, windowed by the
/// offset and length header fields.
pub const MAX_DATA_LENGTH: usize = 1202;

const P2P_CONTENT_TYPE: &str = "application/x-msnmsgrp2p";

/// A P2P message: binary header, body and the big endian application
/// ID footer. Travels inside the MIME payload of `MSG ... D` commands.
#[derive(Debug, Clone, PartialEq)]
pub struct P2pMessage {
    pub header: BinaryHeader,
    pub body: Vec<u8>,
    pub app_id: u32,
}

impl P2pMessage {
    pub fn new(header: BinaryHeader, body: Vec<u8>, app_id: u32) -> Self {
        Self {
            header,
            body,
            app_id,
        }
    }

    /// Builds the acknowledgement for a received message.
    ///
    /// The acked message is named by its identifier; the peer matches
    /// it against the identifier of the last message it sent.
    pub fn ack_of(message: &P2pMessage, identifier: u32) -> Self {
        Self {
            header: BinaryHeader {
                session_id: message.header.session_id,
                identifier,
                offset: 0,
                total_size: message.header.total_size,
                length: 0,
                flag: FLAG_ACK,
                ack_identifier: message.header.identifier,
                ack_unique_id: message.header.ack_identifier,
                ack_data_size: message.header.total_size,
            },
            body: Vec::new(),
            app_id: 0,
        }
    }

    /// Wire form: header, body window and footer.
    ///
    /// When the full payload is stored but the header only covers a
    /// window of it, just that window is written out.
    pub fn to_bytes(&self) -> Result<Vec<u8>, P2pError> {
        let mut bytes = self.header.to_bytes().or(Err(P2pError::BinaryHeader))?;

        let length = self.header.length as usize;
        let body: &[u8] = if self.body.len() as u64 == self.header.total_size
            && length < self.body.len()
        {
            let start = self.header.offset as usize;
            self.body
                .get(start..start + length)
                .ok_or(P2pError::BinaryHeader)?
        } else {
            &self.body
        };

        bytes.extend_from_slice(body);
        bytes.extend_from_slice(&self.app_id.to_be_bytes());
        Ok(bytes)
    }

    /// Parses a binary P2P message.
    ///
    /// Some clients omit the footer on acknowledgements, so anything at
    /// least a header long is accepted and the footer read as zero.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, P2pError> {
        if payload.len() < BINARY_HEADER_LENGTH {
            return Err(P2pError::BinaryHeader);
        }

        let mut cursor = Cursor::new(&payload[..BINARY_HEADER_LENGTH]);
        let (_, header) =
            BinaryHeader::from_reader((&mut cursor, 0)).or(Err(P2pError::BinaryHeader))?;

        let (body, app_id) = if payload.len() >= BINARY_HEADER_LENGTH + 4 {
            let footer_start = payload.len() - 4;
            let mut footer = [0u8; 4];
            footer.copy_from_slice(&payload[footer_start..]);

            (
                payload[BINARY_HEADER_LENGTH..footer_start].to_vec(),
                u32::from_be_bytes(footer),
            )
        } else {
            (payload[BINARY_HEADER_LENGTH..].to_vec(), 0)
        };

        Ok(Self {
            header,
            body,
            app_id,
        })
    }

    /// Wraps the message in its MIME envelope and MSG command.
    pub fn to_outgoing(&self, destination: &str) -> Result<OutgoingMessage, P2pError> {
        let mut payload = String::from("MIME-Version: 1.0\r\n");
        payload.push_str(format!("Content-Type: {P2P_CONTENT_TYPE}\r\n").as_str());
        payload.push_str(format!("P2P-Dest: {destination}\r\n\r\n").as_str());

        let mut payload = payload.into_bytes();
        payload.extend_from_slice(self.to_bytes()?.as_slice());

        Ok(OutgoingMessage::with_chunk("MSG", &["D"], payload))
    }

    /// Unwraps the MIME payload of a MSG command. Returns the P2P-Dest
    /// address, the parsed message and its raw binary form.
    pub fn from_mime_payload(payload: &[u8]) -> Result<(String, Self, Vec<u8>), P2pError> {
        let end = payload
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .ok_or(P2pError::NotP2p)?;

        let headers = str::from_utf8(&payload[..end]).or(Err(P2pError::NotP2p))?;
        if !headers
            .lines()
            .any(|line| line.starts_with("Content-Type: ") && line.contains(P2P_CONTENT_TYPE))
        {
            return Err(P2pError::NotP2p);
        }

        let destination = headers
            .lines()
            .find(|line| line.starts_with("P2P-Dest: "))
            .map(|line| line.replace("P2P-Dest: ", ""))
            .ok_or(P2pError::NotP2p)?;

        let binary = payload[end + 4..].to_vec();
        let message = Self::from_bytes(&binary)?;
        Ok((destination, message, binary))
    }
}
