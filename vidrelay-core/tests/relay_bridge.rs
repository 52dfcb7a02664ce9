use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use vidrelay_core::proto::VideoChunk;
use vidrelay_core::relay::{Downstream, DownstreamConnector, RelayBridge, RelayError, RelayResult};
use vidrelay_core::result::StreamResult;
use vidrelay_core::session::{Session, SessionId, SessionPhase};

#[derive(Default)]
struct Observed {
    opened: usize,
    chunks: Vec<VideoChunk>,
    closed: bool,
    aborted: bool,
}

#[derive(Clone)]
enum Behaviour {
    Reply(StreamResult),
    FailOnSend(usize),
    ReplyOnSend(usize, StreamResult),
    Unreachable,
}

struct FakeTier {
    observed: Arc<Mutex<Observed>>,
    behaviour: Behaviour,
}

struct FakeCall {
    observed: Arc<Mutex<Observed>>,
    behaviour: Behaviour,
}

#[async_trait]
impl DownstreamConnector for FakeTier {
    async fn open(&self) -> RelayResult<Box<dyn Downstream>> {
        if let Behaviour::Unreachable = self.behaviour {
            return Err(RelayError::Connect("connection refused".into()));
        }
        self.observed.lock().unwrap().opened += 1;
        Ok(Box::new(FakeCall {
            observed: Arc::clone(&self.observed),
            behaviour: self.behaviour.clone(),
        }))
    }
}

#[async_trait]
impl Downstream for FakeCall {
    async fn send(&mut self, chunk: VideoChunk) -> RelayResult<()> {
        let mut observed = self.observed.lock().unwrap();
        if let Behaviour::FailOnSend(index) = self.behaviour {
            if observed.chunks.len() == index {
                return Err(RelayError::Downstream("stream reset by peer".into()));
            }
        }
        if let Behaviour::ReplyOnSend(index, result) = &self.behaviour {
            if observed.chunks.len() == *index {
                return Err(RelayError::Replied(result.clone()));
            }
        }
        observed.chunks.push(chunk);
        Ok(())
    }

    async fn close(self: Box<Self>) -> RelayResult<StreamResult> {
        self.observed.lock().unwrap().closed = true;
        match &self.behaviour {
            Behaviour::Reply(result) => Ok(result.clone()),
            _ => Err(RelayError::Downstream("no reply".into())),
        }
    }

    fn abort(self: Box<Self>) {
        self.observed.lock().unwrap().aborted = true;
    }
}

fn bridge(behaviour: Behaviour) -> (RelayBridge, Arc<Mutex<Observed>>) {
    let observed = Arc::new(Mutex::new(Observed::default()));
    let tier = FakeTier {
        observed: Arc::clone(&observed),
        behaviour,
    };
    (RelayBridge::new(Arc::new(tier)).with_progress_interval(2), observed)
}

fn chunk(sequence: i32, data: &[u8]) -> VideoChunk {
    VideoChunk {
        data: data.to_vec(),
        content_type: "video/mp4".into(),
        headers: HashMap::from([("content-length".to_string(), "450".to_string())]),
        sequence,
    }
}

#[tokio::test]
async fn forwards_every_chunk_unmodified_and_returns_reply_verbatim() {
    let reply = StreamResult::success("3/4 succeeded; failures: [360p: conversion failed]");
    let (bridge, observed) = bridge(Behaviour::Reply(reply.clone()));
    let session = Session::new(SessionId::generate("stream"));

    let sent: Vec<VideoChunk> = (0..5)
        .map(|sequence| chunk(sequence, &vec![sequence as u8; 10 + sequence as usize]))
        .collect();
    let inbound = tokio_stream::iter(sent.clone().into_iter().map(Ok));
    let result = bridge
        .relay(inbound, Some(&session), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result, reply);
    let observed = observed.lock().unwrap();
    assert_eq!(observed.opened, 1);
    assert_eq!(observed.chunks, sent);
    assert!(observed.closed);
    assert!(!observed.aborted);
    assert_eq!(session.chunk_count(), 5);
    assert_eq!(session.bytes_received(), 10 + 11 + 12 + 13 + 14);
    assert_eq!(session.sequence_cursor(), 4);
    assert_eq!(session.phase(), SessionPhase::IngestComplete);
}

#[tokio::test]
async fn out_of_order_chunks_are_relayed_as_received() {
    let (bridge, observed) = bridge(Behaviour::Reply(StreamResult::success("ok")));
    let session = Session::new(SessionId::generate("stream"));
    let order = [0, 1, 2, 3, 5, 4];
    let inbound = tokio_stream::iter(order.map(|sequence| Ok(chunk(sequence, b"x"))));

    bridge
        .relay(inbound, Some(&session), &CancellationToken::new())
        .await
        .unwrap();
    let forwarded: Vec<_> = observed.lock().unwrap().chunks.iter().map(|c| c.sequence).collect();
    assert_eq!(forwarded, order);
    assert_eq!(session.anomalies(), 2);
}

#[tokio::test]
async fn downstream_failure_ends_relay_with_abort() {
    let (bridge, observed) = bridge(Behaviour::FailOnSend(2));
    let inbound = tokio_stream::iter((0..5).map(|sequence| Ok(chunk(sequence, b"abc"))));

    let err = bridge
        .relay(inbound, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Downstream(_)));
    let response = err.into_response().unwrap();
    assert!(!response.success);

    let observed = observed.lock().unwrap();
    assert_eq!(observed.chunks.len(), 2);
    assert!(observed.aborted);
    assert!(!observed.closed);
}

#[tokio::test]
async fn early_reply_is_returned_verbatim() {
    let reply = StreamResult::failure("unsupported container");
    let (bridge, observed) = bridge(Behaviour::ReplyOnSend(1, reply.clone()));
    let inbound = tokio_stream::iter((0..4).map(|sequence| Ok(chunk(sequence, b"abc"))));

    let result = bridge
        .relay(inbound, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, reply);

    let observed = observed.lock().unwrap();
    assert_eq!(observed.chunks.len(), 1);
    assert!(observed.aborted);
    assert!(!observed.closed);
}

#[tokio::test]
async fn inbound_failure_aborts_downstream() {
    let (bridge, observed) = bridge(Behaviour::Reply(StreamResult::success("unused")));
    let inbound = tokio_stream::iter(vec![
        Ok(chunk(0, b"abc")),
        Err(Status::unavailable("producer disconnected")),
        Ok(chunk(1, b"def")),
    ]);

    let err = bridge
        .relay(inbound, None, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        RelayError::Inbound(status) => assert_eq!(status.code(), tonic::Code::Unavailable),
        other => panic!("unexpected error {other:?}"),
    }
    let observed = observed.lock().unwrap();
    assert_eq!(observed.chunks.len(), 1);
    assert!(observed.aborted);
    assert!(!observed.closed);
}

#[tokio::test]
async fn cancellation_interrupts_a_stalled_producer() {
    let (bridge, observed) = bridge(Behaviour::Reply(StreamResult::success("unused")));
    let inbound = tokio_stream::iter(vec![Ok(chunk(0, b"abc"))])
        .chain(futures::stream::pending());
    let inbound = Box::pin(inbound);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = bridge.relay(inbound, None, &cancel).await.unwrap_err();
    assert!(matches!(err, RelayError::Cancelled));
    assert_eq!(
        err.into_response().unwrap_err().code(),
        tonic::Code::Cancelled
    );
    let observed = observed.lock().unwrap();
    assert_eq!(observed.chunks.len(), 1);
    assert!(observed.aborted);
}

#[tokio::test]
async fn unreachable_tier_is_a_failed_result() {
    let (bridge, observed) = bridge(Behaviour::Unreachable);
    let inbound = tokio_stream::iter(vec![Ok(chunk(0, b"abc"))]);

    let err = bridge
        .relay(inbound, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Connect(_)));
    let response = err.into_response().unwrap();
    assert!(!response.success);
    assert!(response.message.contains("connection refused"));
    assert_eq!(observed.lock().unwrap().opened, 0);
}
