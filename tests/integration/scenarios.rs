use crate::*;

use courier_core::crypto;
use courier_core::{CryptoError, Envelope, MessageId, MessageState, TERMINATOR};
use courier_services::SessionError;

fn open(payload: &bytes::Bytes, padding: Padding) -> Vec<u8> {
    crypto::decrypt(payload, &recipient_private_key(), padding).expect("envelope opens")
}

/// "hi" under OAEP: one ciphertext block plus terminator.
#[tokio::test]
async fn short_message_is_one_segment() {
    let mut relay = relay(Padding::OaepSha256);

    let id = relay.session.submit(b"hi".to_vec()).await.unwrap();

    assert_eq!(relay.session.status(id).unwrap(), MessageState::Acknowledged);
    let published = relay.transport.published(OUTBOUND);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].len(), MODULUS_LEN + TERMINATOR.len());
    assert!(published[0].ends_with(TERMINATOR));
    assert_eq!(open(&published[0], Padding::OaepSha256), b"hi");
}

/// 400 bytes at capacity 190: chunks of 190, 190 and 20.
#[tokio::test]
async fn long_message_is_chunked_to_capacity() {
    let mut relay = relay(Padding::OaepSha256);
    let plaintext: Vec<u8> = (0..400u32).map(|i| (i % 251) as u8).collect();

    let id = relay.session.submit(plaintext.clone()).await.unwrap();

    let record = relay.session.record(id).unwrap();
    assert_eq!(record.state, MessageState::Acknowledged);
    assert_eq!(record.chunks, 3);
    assert_eq!(record.plaintext_len, 400);

    let published = relay.transport.published(OUTBOUND);
    assert_eq!(published[0].len(), 3 * (MODULUS_LEN + TERMINATOR.len()));
    assert_eq!(open(&published[0], Padding::OaepSha256), plaintext);
}

#[tokio::test]
async fn empty_message_still_publishes_one_segment() {
    let mut relay = relay(Padding::Pkcs1v15);

    let id = relay.session.submit(Vec::new()).await.unwrap();

    assert_eq!(relay.session.record(id).unwrap().chunks, 1);
    let published = relay.transport.published(OUTBOUND);
    assert_eq!(published[0].len(), MODULUS_LEN + TERMINATOR.len());
    assert!(open(&published[0], Padding::Pkcs1v15).is_empty());
}

/// One publish fails; the session keeps going.
#[tokio::test]
async fn publish_failure_is_isolated_to_its_message() {
    let mut relay = relay(Padding::Pkcs1v15);

    let first = relay.session.submit(b"before".to_vec()).await.unwrap();
    relay.transport.fail_next_publishes(1);
    let failed = relay.session.submit(b"dropped".to_vec()).await.unwrap();
    let after = relay.session.submit(b"after".to_vec()).await.unwrap();

    assert_eq!(relay.session.status(first).unwrap(), MessageState::Acknowledged);
    assert_eq!(relay.session.status(failed).unwrap(), MessageState::Failed);
    assert_eq!(relay.session.status(after).unwrap(), MessageState::Acknowledged);
    assert!(relay.session.record(failed).unwrap().failure.is_some());

    // At most once: the failed message is never re-sent.
    let published = relay.transport.published(OUTBOUND);
    assert_eq!(published.len(), 2);
    assert_eq!(open(&published[0], Padding::Pkcs1v15), b"before");
    assert_eq!(open(&published[1], Padding::Pkcs1v15), b"after");
}

#[tokio::test]
async fn closed_transport_fails_messages_without_ending_session() {
    let mut relay = relay(Padding::Pkcs1v15);
    relay.session.shutdown().await.unwrap();

    let id = relay.session.submit(b"late".to_vec()).await.unwrap();
    let record = relay.session.record(id).unwrap();
    assert_eq!(record.state, MessageState::Failed);
    assert_eq!(record.failure.as_deref(), Some("transport is closed"));
}

#[tokio::test]
async fn undersized_key_fails_before_any_publish() {
    let transport = Arc::new(MemoryTransport::new());
    let key = key_store(Padding::OaepSha256)
        .load_public_key("undersized_public")
        .unwrap();
    let mut session = RelaySession::new(
        transport.clone(),
        Arc::new(key),
        OUTBOUND,
        Duration::from_secs(300),
    );

    let err = session.submit(b"hello".to_vec()).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Crypto(CryptoError::PlaintextTooLarge { modulus_len: 64, .. })
    ));
    assert_eq!(session.status(MessageId(1)).unwrap(), MessageState::Failed);
    assert_eq!(transport.publish_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn status_is_forgotten_after_retention() {
    let mut relay = relay_with_retention(Padding::Pkcs1v15, Duration::from_secs(30));

    let id = relay.session.submit(b"x".to_vec()).await.unwrap();
    assert!(relay.session.status(id).is_ok());

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(matches!(
        relay.session.status(id),
        Err(SessionError::UnknownMessageId(missing)) if missing == id
    ));
}

#[tokio::test]
async fn segment_count_matches_record_for_many_sizes() {
    let mut relay = relay(Padding::Pkcs1v15);
    for len in [0usize, 1, 244, 245, 246, 490, 1000] {
        let id = relay.session.submit(vec![0x5a; len]).await.unwrap();
        let record = relay.session.record(id).unwrap();

        let published = relay.transport.published(OUTBOUND);
        let last = published.last().unwrap().clone();
        let envelope = Envelope::from_wire(last, MODULUS_LEN).unwrap();
        assert_eq!(envelope.chunk_count(), record.chunks, "len {len}");
        assert_eq!(record.chunks, len.div_ceil(245).max(1), "len {len}");
    }
}
