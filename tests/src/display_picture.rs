use crate::support::{collect_events, init_logging, relay_pair};
use msnp_core::Event;

#[tokio::test]
async fn display_picture_travels_between_two_sessions() {
    init_logging();

    let (alice, bob) = relay_pair("alice@example.com", "bob@example.com").await;
    let _alice_events = collect_events(&alice);
    let _bob_events = collect_events(&bob);

    let picture: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let object = alice.set_display_picture(picture.clone());

    let event = bob
        .request_display_picture("alice@example.com", &object)
        .await
        .unwrap();

    assert_eq!(
        event,
        Event::DisplayPicture {
            email: "alice@example.com".to_string(),
            data: picture,
        }
    );

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn cached_pictures_are_served_too() {
    init_logging();

    let (alice, bob) = relay_pair("alice@example.com", "bob@example.com").await;
    let _alice_events = collect_events(&alice);
    let _bob_events = collect_events(&bob);

    alice.set_display_picture(vec![1; 64]);

    let picture = vec![7; 1500];
    let object = msnp_core::MsnObject::for_display_picture("alice@example.com", &picture);
    alice.add_display_picture(&object, picture.clone());

    let event = bob
        .request_display_picture("alice@example.com", &object)
        .await
        .unwrap();

    assert_eq!(
        event,
        Event::DisplayPicture {
            email: "alice@example.com".to_string(),
            data: picture,
        }
    );

    alice.close().await;
    bob.close().await;
}
