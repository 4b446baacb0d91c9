use super::*;
use serde_json::json;

#[test]
fn test_call_request_service_key() {
    let request = CallRequest::new("order_service", "2.1", "place", vec![]);
    assert_eq!(request.service_key(), "order_service:2.1");
}

#[test]
fn test_call_request_arg_types_derived() {
    let request = CallRequest::new(
        "svc",
        "1.0",
        "mix",
        vec![json!(1), json!("s"), json!(true), json!(null)],
    );
    assert_eq!(request.arg_types, vec!["number", "string", "bool", "null"]);
}

#[test]
fn test_call_request_return_type_defaults_to_object() {
    let request = CallRequest::new("svc", "1.0", "m", vec![]);
    assert_eq!(request.return_type, "object");

    let request = request.with_return_type("bool");
    assert_eq!(request.return_type, "bool");
}

#[test]
fn test_call_response_success() {
    let response = CallResponse::success(json!({"id": 1}));
    assert!(response.is_ok());
    assert_eq!(response.data_type, "object");
    assert!(response.error.is_none());
}

#[test]
fn test_call_response_failure() {
    let response = CallResponse::failure("service not registered: foo");
    assert!(!response.is_ok());
    assert!(response.data.is_none());
    assert_eq!(
        response.error.as_deref(),
        Some("service not registered: foo")
    );
}

#[test]
fn test_message_type_round_trip() {
    for t in [
        MessageType::Request,
        MessageType::Response,
        MessageType::Heartbeat,
        MessageType::Other,
    ] {
        assert_eq!(MessageType::from_u8(t.as_u8()).unwrap(), t);
    }
    assert!(MessageType::from_u8(17).is_err());
}

#[test]
fn test_message_status_round_trip() {
    for s in [
        MessageStatus::Ok,
        MessageStatus::BadRequest,
        MessageStatus::BadResponse,
    ] {
        assert_eq!(MessageStatus::from_u8(s.as_u8()).unwrap(), s);
    }
    assert!(MessageStatus::Ok.is_ok());
    assert!(!MessageStatus::BadResponse.is_ok());
    assert!(MessageStatus::from_u8(0).is_err());
}

#[test]
fn test_request_message_header_fields() {
    let message = ProtocolMessage::request(
        0,
        CallRequest::new("svc", "1.0", "ping", vec![]),
    );
    assert_eq!(message.header.magic, MAGIC);
    assert_eq!(message.header.version, VERSION);
    assert_eq!(message.header.message_type, MessageType::Request);
    assert_eq!(message.header.status, MessageStatus::Ok);
}

#[test]
fn test_response_message_echoes_request_id() {
    let message = ProtocolMessage::response(
        1234,
        0,
        MessageStatus::BadResponse,
        CallResponse::failure("boom"),
    );
    assert_eq!(message.header.request_id, 1234);
    assert_eq!(message.header.message_type, MessageType::Response);
    assert_eq!(message.header.status, MessageStatus::BadResponse);
}

#[test]
fn test_request_ids_unique_under_concurrency() {
    let handles: Vec<_> = (0..8)
        .map(|_| std::thread::spawn(|| (0..1000).map(|_| next_request_id()).collect::<Vec<_>>()))
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    let count = all.len();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), count);
}
