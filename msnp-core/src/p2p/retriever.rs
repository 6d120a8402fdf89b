use crate::event::Event;
use crate::internal_event::InternalEvent;
use crate::models::msn_object::MsnObject;
use crate::p2p::binary_header::{BinaryHeader, FLAG_NONE};
use crate::p2p::message::P2pMessage;
use crate::p2p::slp::{CONTENT_TYPE_SESSION, EUF_GUID_DISPLAY_PICTURE, SlpBody, SlpRequest};
use crate::sdk_error::SdkError;
use crate::session::outbound::Outbound;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;
use rand::rng;
use std::time::Duration;
use tokio::sync::broadcast;

const RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Asks a contact for their display picture and collects the answer:
/// invite, ack the 200 OK and the data preparation, accumulate the data
/// messages, ack the last one and close the call with a BYE.
pub(crate) async fn retrieve_display_picture(
    outbound: &Outbound,
    internal_tx: &broadcast::Sender<InternalEvent>,
    user_email: &str,
    email: &str,
    msn_object: &MsnObject,
) -> Result<Event, SdkError> {
    let mut internal_rx = internal_tx.subscribe();

    let mut body = SlpBody::new();
    body.set("EUF-GUID", EUF_GUID_DISPLAY_PICTURE);
    body.set("SessionID", &(rng().next_u32() / 2 + 1).to_string());
    body.set("AppID", "1");
    body.set(
        "Context",
        &STANDARD.encode((msn_object.to_xml()? + "\0").as_bytes()),
    );

    let request = SlpRequest::invite(email, user_email, CONTENT_TYPE_SESSION, body);
    let payload = request.to_bytes();

    let base_identifier = rng().next_u32();
    let invite = P2pMessage::new(
        BinaryHeader {
            session_id: 0,
            identifier: base_identifier,
            offset: 0,
            total_size: payload.len() as u64,
            length: payload.len() as u32,
            flag: FLAG_NONE,
            ack_identifier: rng().next_u32(),
            ack_unique_id: 0,
            ack_data_size: 0,
        },
        payload,
        0,
    );

    outbound
        .send_awaiting_ack(invite.to_outgoing(email).or(Err(SdkError::BinaryHeaderError))?)
        .await?;

    let mut next_identifier = base_identifier;
    let mut picture: Vec<u8> = Vec::new();

    let data = tokio::time::timeout(RETRIEVAL_TIMEOUT, async {
        loop {
            match internal_rx.recv().await.or(Err(SdkError::ReceivingError))? {
                InternalEvent::P2POk { peer, message }
                | InternalEvent::P2PDataPreparation { peer, message }
                    if peer == email =>
                {
                    let message =
                        P2pMessage::from_bytes(&message).or(Err(SdkError::BinaryHeaderError))?;

                    next_identifier = next_identifier.wrapping_add(1);
                    let ack = P2pMessage::ack_of(&message, next_identifier);
                    outbound
                        .send(ack.to_outgoing(email).or(Err(SdkError::BinaryHeaderError))?)
                        .await?;
                }

                InternalEvent::P2PData { peer, message } if peer == email => {
                    let message =
                        P2pMessage::from_bytes(&message).or(Err(SdkError::BinaryHeaderError))?;

                    picture.extend_from_slice(&message.body);

                    if message.header.offset + message.header.length as u64
                        >= message.header.total_size
                    {
                        next_identifier = next_identifier.wrapping_add(1);
                        let ack = P2pMessage::ack_of(&message, next_identifier);
                        outbound
                            .send(ack.to_outgoing(email).or(Err(SdkError::BinaryHeaderError))?)
                            .await?;

                        let bye_payload =
                            SlpRequest::bye(email, user_email, &request.branch, &request.call_id)
                                .to_bytes();

                        next_identifier = next_identifier.wrapping_add(1);
                        let bye = P2pMessage::new(
                            BinaryHeader {
                                session_id: 0,
                                identifier: next_identifier,
                                offset: 0,
                                total_size: bye_payload.len() as u64,
                                length: bye_payload.len() as u32,
                                flag: FLAG_NONE,
                                ack_identifier: rng().next_u32(),
                                ack_unique_id: 0,
                                ack_data_size: 0,
                            },
                            bye_payload,
                            0,
                        );

                        let _ = outbound
                            .send(bye.to_outgoing(email).or(Err(SdkError::BinaryHeaderError))?)
                            .await;

                        return Ok::<Vec<u8>, SdkError>(std::mem::take(&mut picture));
                    }
                }

                _ => (),
            }
        }
    })
    .await
    .or(Err(SdkError::CouldNotGetDisplayPicture))??;

    Ok(Event::DisplayPicture {
        email: email.to_string(),
        data,
    })
}
