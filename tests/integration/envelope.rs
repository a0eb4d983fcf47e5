use crate::*;

use courier_core::crypto;
use courier_core::{CryptoError, Envelope, FramerError};

/// The recipient rejects anything that is not a whole number of segments.
#[tokio::test]
async fn truncated_envelope_is_rejected_by_recipient() {
    let mut relay = relay(Padding::Pkcs1v15);
    relay.session.submit(vec![1u8; 300]).await.unwrap();
    let published = relay.transport.published(OUTBOUND);
    let wire = &published[0];

    let truncated = &wire[..wire.len() - 1];
    assert!(matches!(
        crypto::decrypt(truncated, &recipient_private_key(), Padding::Pkcs1v15),
        Err(CryptoError::Framing(FramerError::MalformedEnvelope(_)))
    ));
    assert!(Envelope::from_wire(wire.slice(..wire.len() - 1), MODULUS_LEN).is_err());
}

#[tokio::test]
async fn reordered_segments_scramble_the_plaintext() {
    let mut relay = relay(Padding::Pkcs1v15);
    let plaintext: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
    relay.session.submit(plaintext.clone()).await.unwrap();

    let published = relay.transport.published(OUTBOUND);
    let envelope = Envelope::from_wire(published[0].clone(), MODULUS_LEN).unwrap();
    let segments: Vec<&[u8]> = envelope.segments().collect();
    assert_eq!(segments.len(), 2);

    let swapped = courier_core::framer::seal_segments([segments[1], segments[0]]);
    let opened = crypto::decrypt(&swapped, &recipient_private_key(), Padding::Pkcs1v15).unwrap();
    assert_eq!(opened.len(), plaintext.len());
    assert_ne!(opened, plaintext);
}

#[test]
fn same_plaintext_encrypts_differently_with_same_boundaries() {
    let key = recipient_key(Padding::OaepSha256);
    let a = crypto::encrypt(b"repeat me", &key).unwrap();
    let b = crypto::encrypt(b"repeat me", &key).unwrap();

    assert_ne!(a.as_bytes(), b.as_bytes());
    assert_eq!(a.len(), b.len());
    assert_eq!(a.chunk_count(), b.chunk_count());
}
