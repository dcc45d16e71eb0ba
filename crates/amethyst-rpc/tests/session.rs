//! Session behaviour against a hand-driven peer on the other end of a duplex pipe.

use std::time::Duration;

use amethyst_rpc::envelope::{decode_payload, encode_payload, CallFrame, Envelope, ReplyFrame};
use amethyst_rpc::frame::{spawn_writer, ChannelOptions, FrameReader, FrameSender};
use amethyst_rpc::{Fault, Method, Router, RpcError, RpcSession, SessionState};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::io::{duplex, DuplexStream, ReadHalf};
use tokio::time::timeout;

struct RawPeer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    sender: FrameSender,
}

impl RawPeer {
    async fn next_envelope(&mut self) -> Envelope {
        let frame = timeout(Duration::from_secs(5), self.reader.recv())
            .await
            .expect("peer timed out waiting for a frame")
            .expect("channel failed");
        Envelope::decode(&frame).unwrap()
    }

    async fn send(&self, envelope: &Envelope) {
        self.sender.send(&envelope.encode().unwrap()).await.unwrap();
    }
}

fn session_with_raw_peer() -> (RpcSession<Method>, RawPeer) {
    session_with_router(Router::new())
}

fn session_with_router(router: Router<Method>) -> (RpcSession<Method>, RawPeer) {
    let (a, b) = duplex(64 * 1024);
    let session = RpcSession::new(a, router, ChannelOptions::default(), "under-test");
    let (read_half, write_half) = tokio::io::split(b);
    let (sender, _writer) = spawn_writer(write_half, ChannelOptions::default());
    let peer = RawPeer {
        reader: FrameReader::new(read_half, ChannelOptions::default().max_frame_len),
        sender,
    };
    (session, peer)
}

#[tokio::test]
async fn concurrent_calls_match_replies_sent_out_of_order() {
    let (session, mut peer) = session_with_raw_peer();

    let mut waiters = Vec::new();
    for i in 0..50u32 {
        let session = session.clone();
        waiters.push(tokio::spawn(async move {
            let reason = format!("request-{i}");
            let echoed: String = session.call(Method::RequestVrRestart, &reason).await.unwrap();
            (reason, echoed)
        }));
    }

    let mut calls = Vec::new();
    for _ in 0..50 {
        match peer.next_envelope().await {
            Envelope::Call(call) => {
                assert!(call.want_reply);
                assert_eq!(call.method, "RequestVrRestart");
                calls.push(call);
            }
            other => panic!("expected a call, got {other:?}"),
        }
    }
    let mut ids: Vec<u32> = calls.iter().map(|c| c.call_id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50, "call ids must be unique while in flight");

    calls.shuffle(&mut thread_rng());
    calls.reverse();
    for call in calls {
        let reason: String = decode_payload(&call.args).unwrap();
        let reply = Envelope::Reply(ReplyFrame {
            call_id: call.call_id,
            outcome: Ok(encode_payload(&format!("echo:{reason}")).unwrap()),
        });
        peer.send(&reply).await;
    }

    for waiter in waiters {
        let (reason, echoed) = waiter.await.unwrap();
        assert_eq!(echoed, format!("echo:{reason}"));
    }
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn notify_returns_without_a_reply() {
    let (session, mut peer) = session_with_raw_peer();

    timeout(
        Duration::from_millis(500),
        session.notify(Method::UpdateTrackerList, &Vec::<u8>::new()),
    )
    .await
    .expect("notify blocked")
    .unwrap();
    assert_eq!(session.pending_calls(), 0);

    match peer.next_envelope().await {
        Envelope::Call(call) => {
            assert!(!call.want_reply);
            assert_eq!(call.call_id, 0);
        }
        other => panic!("expected a call, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Listening);
}

#[tokio::test]
async fn undecodable_frame_closes_session_and_fails_pending_calls() {
    let (session, mut peer) = session_with_raw_peer();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.call::<_, i64>(Method::PingDriverService, &()).await })
    };
    assert!(matches!(peer.next_envelope().await, Envelope::Call(_)));

    peer.sender.send(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();

    let err = timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RpcError::ConnectionLost(_)), "got {err:?}");
    timeout(Duration::from_secs(2), session.closed()).await.unwrap();
    assert!(session.is_closed());

    // The stream itself is torn down as well.
    let next = timeout(Duration::from_secs(2), peer.reader.recv()).await.unwrap();
    assert!(next.is_err());
}

#[tokio::test]
async fn unknown_inbound_method_gets_method_not_found_reply() {
    let (_session, mut peer) = session_with_raw_peer();

    let call = Envelope::Call(CallFrame {
        call_id: 9,
        method: "FlyToTheMoon".into(),
        want_reply: true,
        args: Vec::new(),
    });
    peer.send(&call).await;

    match peer.next_envelope().await {
        Envelope::Reply(ReplyFrame {
            call_id: 9,
            outcome: Err(fault),
        }) => {
            assert_eq!(fault.kind, amethyst_rpc::FaultKind::MethodNotFound);
            assert_eq!(fault.message, "FlyToTheMoon");
        }
        other => panic!("expected a fault reply, got {other:?}"),
    }
}

#[tokio::test]
async fn peer_hangup_resolves_waiters() {
    let (session, mut peer) = session_with_raw_peer();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.call::<_, i64>(Method::PingDriverService, &()).await })
    };
    assert!(matches!(peer.next_envelope().await, Envelope::Call(_)));
    peer.sender.shutdown();
    drop(peer);

    let err = timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_unreachable());
}

#[tokio::test]
async fn stuck_notification_handler_does_not_hold_back_replies() {
    let router = Router::new().route(Method::UpdateTrackerList, |_: Vec<u8>| async {
        std::future::pending::<Result<(), Fault>>().await
    });
    let (session, mut peer) = session_with_router(router);

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.call::<_, i64>(Method::PingDriverService, &()).await })
    };
    let call_id = match peer.next_envelope().await {
        Envelope::Call(call) => call.call_id,
        other => panic!("expected a call, got {other:?}"),
    };

    let push = Envelope::Call(CallFrame {
        call_id: 0,
        method: "UpdateTrackerList".into(),
        want_reply: false,
        args: encode_payload(&Vec::<u8>::new()).unwrap(),
    });
    for _ in 0..300 {
        peer.send(&push).await;
    }
    peer.send(&Envelope::Reply(ReplyFrame {
        call_id,
        outcome: Ok(encode_payload(&42i64).unwrap()),
    }))
    .await;

    let value = timeout(Duration::from_secs(3), pending)
        .await
        .expect("reply was held behind notifications")
        .unwrap()
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(session.state(), SessionState::Listening);
}

#[tokio::test]
async fn close_returns_when_peer_stops_reading() {
    let (a, _silent_peer) = duplex(64);
    let options = ChannelOptions {
        outbox_capacity: 4,
        ..ChannelOptions::default()
    };
    let session = RpcSession::new(a, Router::<Method>::new(), options, "stalled");

    let payload = vec![7u8; 32];
    let mut timed_out = false;
    for _ in 0..32 {
        match session
            .notify_timeout(Method::UpdateTrackerList, &payload, Duration::from_millis(100))
            .await
        {
            Ok(()) => continue,
            Err(RpcError::Timeout { timeout_ms }) => {
                assert_eq!(timeout_ms, 100);
                timed_out = true;
                break;
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert!(timed_out, "pushes never backed up against a silent peer");

    timeout(Duration::from_secs(3), session.close())
        .await
        .expect("close hung on a peer that never reads");
    assert!(session.is_closed());
    assert!(session
        .notify(Method::UpdateTrackerList, &payload)
        .await
        .is_err());
}
