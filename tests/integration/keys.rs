use crate::*;

use courier_core::KeyLoadError;

/// A bad identifier must fail at load time, before any session exists.
#[test]
fn missing_key_is_a_load_error() {
    let err = key_store(Padding::Pkcs1v15)
        .load_public_key("public_key_hardware_node_9")
        .unwrap_err();
    assert!(matches!(err, KeyLoadError::ReadFailed(path, _) if path.ends_with("public_key_hardware_node_9.pem")));
}

#[test]
fn garbage_key_is_a_load_error() {
    let err = key_store(Padding::Pkcs1v15)
        .load_public_key("garbage")
        .unwrap_err();
    assert!(matches!(err, KeyLoadError::InvalidKeyMaterial(_)));
}

#[test]
fn capacity_follows_padding() {
    assert_eq!(recipient_key(Padding::Pkcs1v15).max_plaintext_capacity(), 245);
    assert_eq!(recipient_key(Padding::OaepSha256).max_plaintext_capacity(), 190);
}

#[test]
fn private_fixture_matches_public_fixture() {
    use rsa::traits::PublicKeyParts;

    let private = recipient_private_key();
    let public = recipient_key(Padding::Pkcs1v15);
    assert_eq!(private.n(), public.public_key().n());
}
