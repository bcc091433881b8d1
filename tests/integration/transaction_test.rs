//! Single-caller transaction semantics against the recording transport.

use super::instrument_mock::{table, Event, FailingProbe, RecordingTransport};
use scpi_exchange::{
    ConnectionPolicy, Endpoint, ExchangeClient, ExchangeError, InstrumentExchange, LinkState,
    NoProbe, TransactionPhase,
};
use std::sync::Arc;
use std::time::Duration;

fn endpoint() -> Endpoint {
    Endpoint::new("192.0.2.10", 5025).unwrap()
}

fn client_for(transport: RecordingTransport) -> ExchangeClient {
    ExchangeClient::builder(endpoint())
        .with_transport(transport)
        .with_probe(NoProbe)
        .build()
}

fn has_read(events: &[Event]) -> bool {
    events.iter().any(|e| matches!(e, Event::Read(..)))
}

#[test]
fn test_endpoint_construction() {
    assert!(Endpoint::new("192.0.2.10", 5025).is_ok());
    assert!(Endpoint::new("2001:db8::1", 5025).is_ok());

    for host in ["", "not-an-ip", "192.0.2", "192.0.2.10:5025"] {
        let err = Endpoint::new(host, 5025).unwrap_err();
        assert!(
            matches!(err, ExchangeError::InvalidEndpoint { .. }),
            "{host:?} should be rejected"
        );
    }
    assert!(ExchangeClient::new("", 5025).is_err());
}

#[tokio::test]
async fn test_int_query_reads_one_reply() {
    let transport = RecordingTransport::new(table(&[("OUTP:STAT?;", "1\n")]));
    let log = transport.call_log();
    let client = client_for(transport);

    assert_eq!(client.send_with_request_int("OUTP:STAT?;").await.unwrap(), 1);

    assert_eq!(log.connections(), 1);
    assert_eq!(log.written(0), b"OUTP:STAT?;\n");
    assert_eq!(log.reads(0), vec![b"1\n".to_vec()]);
}

#[tokio::test]
async fn test_command_without_marker_never_reads() {
    let transport = RecordingTransport::new(table(&[])).with_greeting(b"unsolicited\n");
    let log = transport.call_log();
    let client = client_for(transport);

    client.send_without_request("OUTP ON;").await.unwrap();

    assert_eq!(log.written(0), b"OUTP ON;\n");
    assert!(!has_read(&log.events_for(0)));
}

#[tokio::test]
async fn test_failed_probe_never_opens_socket() {
    let probe = FailingProbe::default();
    let transport = RecordingTransport::new(table(&[("VOLT?;", "5.0\n")]));
    let log = transport.call_log();
    let client = ExchangeClient::builder(endpoint())
        .with_transport(transport)
        .with_probe(probe.clone())
        .build();

    let err = client.send_with_request_double("VOLT?;").await.unwrap_err();
    match &err {
        ExchangeError::DeviceUnreachable { address, .. } => assert_eq!(address, "192.0.2.10"),
        other => panic!("expected DeviceUnreachable, got {other:?}"),
    }
    assert!(err.is_connectivity());
    assert_eq!(err.command(), Some("VOLT?;"));

    // No retry inside the client, but every new transaction probes again.
    assert!(client.send_without_request("OUTP ON;").await.is_err());
    assert_eq!(probe.attempts(), 2);
    assert_eq!(log.connections(), 0);
}

#[tokio::test]
async fn test_double_query_is_locale_independent() {
    let transport = RecordingTransport::new(table(&[
        ("MEAS:VOLT?;", "12.50\r\n"),
        ("value?;", "3,14\n"),
        ("FREQ?;", "1.5E+9\n"),
    ]));
    let client = client_for(transport);

    assert_eq!(client.send_with_request_double("MEAS:VOLT?;").await.unwrap(), 12.5);
    assert_eq!(client.send_with_request_double("value?;").await.unwrap(), 3.14);
    assert_eq!(client.send_with_request_double("FREQ?;").await.unwrap(), 1.5e9);
}

#[tokio::test]
async fn test_string_query_returns_trimmed_reply() {
    let transport = RecordingTransport::new(table(&[("SYST:ERR?;", "  0,\"No error\"\r\n")]));
    let client = client_for(transport);

    assert_eq!(
        client.send_with_request_string("SYST:ERR?;").await.unwrap(),
        "0,\"No error\""
    );
}

#[tokio::test]
async fn test_every_transaction_uses_a_fresh_connection() {
    let transport = RecordingTransport::new(table(&[("OUTP:STAT?;", "0\n")]));
    let log = transport.call_log();
    let client = client_for(transport);
    assert_eq!(client.link_state().await, LinkState::NotConnected);

    client.send_with_request_int("OUTP:STAT?;").await.unwrap();
    client.send_without_request("OUTP ON;").await.unwrap();
    client.send_with_request_int("OUTP:STAT?;").await.unwrap();

    assert_eq!(log.connections(), 3);
    for id in 0..3 {
        let events = log.events_for(id);
        assert_eq!(events.first(), Some(&Event::Connect(id)));
        assert_eq!(events.last(), Some(&Event::Dropped(id)));
        assert!(events.contains(&Event::Shutdown(id)));
    }
    assert_eq!(client.link_state().await, LinkState::Closed);
    assert_eq!(client.transactions(), 3);
}

#[tokio::test]
async fn test_timeout_drops_connection_and_next_call_reconnects() {
    // MEAS? is left unanswered.
    let transport = RecordingTransport::new(table(&[("OUTP:STAT?;", "1\n")]));
    let log = transport.call_log();
    let client = client_for(transport);

    let err = client
        .query_within("MEAS:VOLT?;", Duration::from_millis(100))
        .await
        .unwrap_err();
    match err {
        ExchangeError::Timeout { phase, elapsed, .. } => {
            assert_eq!(phase, TransactionPhase::Receiving);
            assert!(elapsed >= Duration::from_millis(100));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(log.events_for(0).last(), Some(&Event::Dropped(0)));
    assert_eq!(client.link_state().await, LinkState::Closed);

    assert_eq!(client.send_with_request_int("OUTP:STAT?;").await.unwrap(), 1);
    assert_eq!(log.connections(), 2);
}

#[tokio::test]
async fn test_parse_error_keeps_reply_and_closes_connection() {
    let transport = RecordingTransport::new(table(&[("CURR?;", "1.0\n")]));
    let log = transport.call_log();
    let client = client_for(transport);

    let err = client.send_with_request_int("CURR?;").await.unwrap_err();
    assert!(err.is_data());
    match err {
        ExchangeError::Parse { reply, expected, .. } => {
            assert_eq!(reply, "1.0");
            assert_eq!(expected, "integer");
        }
        other => panic!("expected Parse, got {other:?}"),
    }
    assert_eq!(log.events_for(0).last(), Some(&Event::Dropped(0)));
}

#[tokio::test]
async fn test_query_sent_without_request_is_drained() {
    let transport = RecordingTransport::new(table(&[("CURR?;", "2.5\n")]));
    let log = transport.call_log();
    let client = client_for(transport);

    client.send_without_request("CURR?;").await.unwrap();
    assert_eq!(log.reads(0), vec![b"2.5\n".to_vec()]);
}

#[tokio::test]
async fn test_persistent_policy_reuses_until_failure() {
    let transport = RecordingTransport::new(table(&[("VOLT?;", "5\n")]));
    let log = transport.call_log();
    let client = ExchangeClient::builder(endpoint())
        .with_transport(transport)
        .with_probe(NoProbe)
        .with_policy(ConnectionPolicy::Persistent)
        .build();

    for _ in 0..3 {
        assert_eq!(client.send_with_request_int("VOLT?;").await.unwrap(), 5);
    }
    assert_eq!(log.connections(), 1);
    assert_eq!(client.link_state().await, LinkState::Connected);

    let err = client
        .query_within("MEAS?;", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Timeout { .. }));
    assert_eq!(client.link_state().await, LinkState::Closed);

    assert_eq!(client.send_with_request_int("VOLT?;").await.unwrap(), 5);
    assert_eq!(log.connections(), 2);
}

#[tokio::test]
async fn test_client_behind_trait_object() {
    let transport = RecordingTransport::new(table(&[
        ("*IDN?", "Keysight Technologies,N5746A,US12345678,A.05.02\n"),
        ("OUTP?;", "ON\n"),
    ]));
    let exchange: Arc<dyn InstrumentExchange> = Arc::new(client_for(transport));

    let identity = exchange.identify().await.unwrap();
    assert_eq!(identity.manufacturer, "Keysight Technologies");
    assert_eq!(identity.model, "N5746A");
    assert!(exchange.send_with_request_bool("OUTP?;").await.unwrap());
}
