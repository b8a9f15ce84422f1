use std::sync::Arc;

use ventlink::serial::{DeviceClient, FakeDeviceLink, SerialError, SerialSettings};

fn client_over(link: FakeDeviceLink) -> DeviceClient {
    let settings = SerialSettings::default();
    DeviceClient::new(link, &settings, default_field_order())
}

fn default_field_order() -> Vec<String> {
    ventlink::ConsoleConfig::default().field_order
}

#[tokio::test]
async fn test_retry_budget_is_exactly_honoured() {
    let fake = FakeDeviceLink::malformed();
    let client = client_over(fake.clone());

    let result = client.get("pressure").await;
    match result {
        Err(SerialError::ProtocolFailure { verb, command, .. }) => {
            assert_eq!(verb, "get");
            assert_eq!(command, "get pressure\r\n");
        }
        other => panic!("expected ProtocolFailure, got {:?}", other.map(|_| ())),
    }

    // One full write+read cycle per attempt, ten attempts by default.
    assert_eq!(fake.write_count(), 10);
    assert!(fake.writes().iter().all(|line| line == "get pressure"));
}

#[tokio::test]
async fn test_get_recovers_within_budget() {
    let fake = FakeDeviceLink::new();
    fake.push_timeout();
    fake.push_timeout();
    let client = client_over(fake.clone());

    let value = client.get("pressure").await.unwrap();
    assert_eq!(value, "pressure");
    assert_eq!(fake.write_count(), 3);
}

#[tokio::test]
async fn test_wrong_reply_key_is_retried() {
    let fake = FakeDeviceLink::new().with_value("o2", "21.5");
    fake.push_reply("value=21.5");
    let client = client_over(fake.clone());

    assert_eq!(client.get("o2").await.unwrap(), "21.5");
    assert_eq!(fake.write_count(), 2);
}

#[tokio::test]
async fn test_reply_whitespace_is_trimmed() {
    let fake = FakeDeviceLink::new();
    fake.push_reply("valore =  42.5 ");
    let client = client_over(fake.clone());

    assert_eq!(client.get("pressure").await.unwrap(), "42.5");
}

#[tokio::test]
async fn test_set_acknowledges_and_stores() {
    let fake = FakeDeviceLink::new();
    let client = client_over(fake.clone());

    let ack = client.set("peep", 5).await.unwrap();
    assert_eq!(ack, "OK");
    assert_eq!(fake.writes(), vec!["set peep 5"]);
    assert_eq!(fake.stored("peep").as_deref(), Some("5"));
}

#[tokio::test]
async fn test_get_all_parses_firmware_field_order() {
    let fake = FakeDeviceLink::new();
    fake.push_reply("valore=10.0,5.0,21.0,12.0,500.0,5.0,25.0,0,80.0");
    let client = client_over(fake.clone());

    let snapshot = client.get_all().await.unwrap();
    assert_eq!(fake.writes(), vec!["get all"]);
    assert_eq!(snapshot.len(), 9);
    assert_eq!(snapshot["pressure"], 10.0);
    assert_eq!(snapshot["flow"], 5.0);
    assert_eq!(snapshot["o2"], 21.0);
    assert_eq!(snapshot["bpm"], 12.0);
    assert_eq!(snapshot["tidal"], 500.0);
    assert_eq!(snapshot["peep"], 5.0);
    assert_eq!(snapshot["temperature"], 25.0);
    assert_eq!(snapshot["power_mode"], 0.0);
    assert_eq!(snapshot["battery"], 80.0);
}

#[tokio::test]
async fn test_get_all_field_count_mismatch_exhausts_budget() {
    let fake = FakeDeviceLink::new().with_value("all", "1.0,2.0");
    let client = client_over(fake.clone());

    let result = client.get_all().await;
    assert!(matches!(result, Err(SerialError::ProtocolFailure { .. })));
    assert_eq!(fake.write_count(), 10);
}

#[tokio::test]
async fn test_fault_masks_parse_as_integers() {
    let fake = FakeDeviceLink::new()
        .with_value("alarm", "129")
        .with_value("warning", "3.0");
    let client = client_over(fake);

    assert_eq!(client.get_alarms().await.unwrap(), 0b1000_0001);
    assert_eq!(client.get_warnings().await.unwrap(), 0b11);
}

#[tokio::test]
async fn test_alarm_wrappers_write_expected_commands() {
    let fake = FakeDeviceLink::new();
    let client = client_over(fake.clone());

    client.reset_alarms().await.unwrap();
    client.reset_warnings().await.unwrap();
    client.raise_gui_alarm().await.unwrap();
    client.snooze_gui_alarm().await.unwrap();
    client.snooze_hw_alarm(7).await.unwrap();
    client.set_watchdog().await.unwrap();

    let expected = vec![
        "set alarm 0".to_string(),
        "set warning 0".to_string(),
        format!("set alarm {}", 1u32 << 29),
        format!("set alarm_snooze {}", 1u32 << 29),
        "set alarm_snooze 128".to_string(),
        "set watchdog_reset 1".to_string(),
    ];
    assert_eq!(fake.writes(), expected);
}

#[tokio::test]
async fn test_concurrent_commands_never_interleave() {
    let fake = FakeDeviceLink::new();
    let client = Arc::new(client_over(fake.clone()));

    // Each caller must receive the echo for its own parameter; with a
    // broken lock the shared line would misdeliver replies.
    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let name = format!("param{}", i);
            (name.clone(), client.get(&name).await.unwrap())
        }));
    }

    for task in tasks {
        let (name, value) = task.await.unwrap();
        assert_eq!(name, value);
    }
    assert_eq!(fake.write_count(), 8);
}
