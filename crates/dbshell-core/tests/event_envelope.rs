//! Integration tests for the dbshell-core event envelope.
//!
//! These tests drive the public API the way an out-of-process driver host
//! would: a facade numbers its requests with a `RequestSequence`, frames them
//! onto a byte stream, and the host frames its responses back with the same
//! correlation ids.

use std::collections::BTreeMap;

use dbshell_core::{
    decode_event, encode_event,
    domain::{DatabaseInfo, PropertyType},
    protocol::{
        messages::{
            ChangePropertyRequest, ChangePropertyResponse, ExecuteRequest, ExecuteResponse,
            LoadDatabaseContentRequest, LoadDatabaseContentResponse, RootCompleted, RootCreated,
            ServerInfoRequest, ServerInfoResponse,
        },
        RequestSequence,
    },
    Event, EventKind, Request, Response, TreeItem,
};
use uuid::Uuid;

/// Decodes every envelope in `stream`, in order.
fn decode_all<P>(mut stream: &[u8]) -> Vec<Event<P>>
where
    P: dbshell_core::protocol::messages::Tagged + serde::de::DeserializeOwned,
{
    let mut out = Vec::new();
    while !stream.is_empty() {
        let (event, used) = decode_event::<P>(stream).expect("decode must succeed");
        out.push(event);
        stream = &stream[used..];
    }
    out
}

#[test]
fn test_request_stream_preserves_order_and_correlation_ids() {
    // Arrange
    let origin = Uuid::new_v4();
    let ids = RequestSequence::new();
    let requests = vec![
        Request::Execute(ExecuteRequest {
            command: "SET a 1".to_string(),
        }),
        Request::LoadDatabaseContent(LoadDatabaseContentRequest {
            database: DatabaseInfo::new("0", 1, true),
        }),
        Request::ChangeProperty(ChangePropertyRequest {
            new_item: PropertyType::new("maxmemory", "64mb"),
        }),
    ];

    // Act
    let mut stream = Vec::new();
    for request in requests.clone() {
        let event = Event::new(origin, ids.next_id(), request);
        stream.extend(encode_event(&event).expect("encode"));
    }
    let decoded = decode_all::<Request>(&stream);

    // Assert
    let correlations: Vec<u64> = decoded.iter().map(|e| e.correlation).collect();
    assert_eq!(correlations, vec![1, 2, 3]);
    let payloads: Vec<Request> = decoded.into_iter().map(Event::into_payload).collect();
    assert_eq!(payloads, requests);
}

#[test]
fn test_response_stream_with_driver_originated_events() {
    // Arrange: a driver answering request 5 reports progress and a result tree
    // before the final response.
    let origin = Uuid::new_v4();
    let request = ExecuteRequest {
        command: "KEYS *".to_string(),
    };
    let responses = vec![
        Response::Progress(0),
        Response::RootCreated(RootCreated {
            root: TreeItem::root(1, "KEYS *"),
        }),
        Response::ChildAdded(TreeItem::child(2, 1, "alpha")),
        Response::RootCompleted(RootCompleted {
            root_id: 1,
            elapsed_ms: 3,
        }),
        Response::Progress(100),
        Response::Execute(ExecuteResponse {
            request,
            error: None,
        }),
    ];

    // Act
    let mut stream = Vec::new();
    for response in &responses {
        stream.extend(encode_event(&Event::new(origin, 5, response.clone())).expect("encode"));
    }
    let decoded = decode_all::<Response>(&stream);

    // Assert
    let kinds: Vec<EventKind> = decoded.iter().map(Event::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Progress,
            EventKind::RootCreated,
            EventKind::ChildAdded,
            EventKind::RootCompleted,
            EventKind::Progress,
            EventKind::Execute,
        ]
    );
    assert!(decoded.iter().all(|e| e.origin == origin && e.correlation == 5));
}

#[test]
fn test_structured_response_payloads_survive_the_envelope() {
    let mut info = BTreeMap::new();
    info.insert("redis_version".to_string(), "7.2.4".to_string());
    info.insert("connected_clients".to_string(), "3".to_string());

    let events = vec![
        Event::new(
            Uuid::new_v4(),
            9,
            Response::ServerInfo(ServerInfoResponse {
                request: ServerInfoRequest,
                info,
                error: None,
            }),
        ),
        Event::new(
            Uuid::new_v4(),
            10,
            Response::LoadDatabaseContent(LoadDatabaseContentResponse {
                request: LoadDatabaseContentRequest {
                    database: DatabaseInfo::new("1", 2, false),
                },
                keys: vec!["a".to_string(), "b".to_string()],
                error: None,
            }),
        ),
        Event::new(
            Uuid::new_v4(),
            11,
            Response::ChangeProperty(ChangePropertyResponse {
                request: ChangePropertyRequest {
                    new_item: PropertyType::new("timeout", "30"),
                },
                is_changed: true,
                error: None,
            }),
        ),
    ];

    for event in events {
        let bytes = encode_event(&event).expect("encode");
        let (decoded, used) = decode_event::<Response>(&bytes).expect("decode");
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, event);
    }
}
