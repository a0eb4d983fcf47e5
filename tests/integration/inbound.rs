use crate::*;

use std::sync::Mutex;

use courier_services::{on_message, Transport};

#[tokio::test]
async fn inbound_messages_arrive_in_order_until_unsubscribe() {
    let transport = MemoryTransport::new();
    let inbox = transport.subscribe(INBOUND).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handler = {
        let seen = seen.clone();
        on_message(inbox, move |message| {
            seen.lock().unwrap().push(String::from_utf8_lossy(&message.payload).into_owned());
        })
    };

    for text in ["status: ok", "status: busy", "status: ok"] {
        assert!(transport.inject(INBOUND, text));
    }
    transport.unsubscribe(INBOUND).await.unwrap();
    assert!(!transport.inject(INBOUND, "ignored"));
    handler.await.unwrap();

    assert_eq!(*seen.lock().unwrap(), ["status: ok", "status: busy", "status: ok"]);
}

/// Outbound envelopes go to their own channel; the inbound handler never sees
/// them.
#[tokio::test]
async fn outbound_publishes_do_not_reach_inbound_handler() {
    let Relay {
        transport,
        mut session,
    } = relay(Padding::Pkcs1v15);
    let inbox = transport.subscribe(INBOUND).await.unwrap();
    let count = Arc::new(Mutex::new(0usize));

    let handler = {
        let count = count.clone();
        on_message(inbox, move |_| *count.lock().unwrap() += 1)
    };

    session.submit(b"to the node".to_vec()).await.unwrap();
    transport.inject(INBOUND, "from the node");
    session.shutdown().await.unwrap();
    handler.await.unwrap();

    assert_eq!(*count.lock().unwrap(), 1);
}
