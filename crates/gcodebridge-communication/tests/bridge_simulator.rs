use gcodebridge_communication::{
    BridgeConfig, BridgeState, ConnectOptions, ConnectionParams, Controller, JogRequest,
    RealtimeCommand, SerialBridge, SimulatedGrbl, SimulatorHandle, SimulatorOpener,
};
use gcodebridge_core::{
    AppEvent, CommunicationEvent, ConnectionError, ConnectionEvent, ControllerError,
    DisconnectReason, Error, EventBus, MachineEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn test_config() -> BridgeConfig {
    BridgeConfig {
        init_delay: Duration::ZERO,
        command_timeout: Duration::from_millis(500),
        status_timeout: Duration::from_millis(500),
        ..BridgeConfig::default()
    }
}

fn new_bridge(config: BridgeConfig) -> SerialBridge {
    SerialBridge::new(
        config,
        ConnectionParams::default(),
        Arc::new(SimulatorOpener),
        Arc::new(EventBus::new()),
    )
}

async fn attached(config: BridgeConfig, sim: SimulatedGrbl) -> (SerialBridge, SimulatorHandle) {
    let bridge = new_bridge(config);
    let handle = sim.handle();
    bridge
        .attach(Box::new(sim), "sim0")
        .await
        .expect("attach simulator");
    (bridge, handle)
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<AppEvent>, mut pred: F) -> AppEvent
where
    F: FnMut(&AppEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event not published in time")
}

#[tokio::test]
async fn test_ok_reply_collects_informational_lines() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;
    assert_eq!(
        bridge.state(),
        BridgeState::Connected {
            port: "sim0".to_string()
        }
    );

    let reply = bridge.send_command("  $I ").await.unwrap();
    assert_eq!(reply.command, "$I");
    assert_eq!(reply.response, "ok");
    assert_eq!(reply.lines, vec!["[VER:1.1h.20190825:]", "[OPT:V,15,128]"]);
    assert_eq!(sim.received_lines(), vec!["$I"]);

    let reply = bridge.send_command("$$").await.unwrap();
    assert!(reply.lines.iter().any(|l| l == "$110=500.000"));
}

#[tokio::test]
async fn test_every_line_is_published() {
    let (bridge, _sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let mut rx = bridge.events().receiver();

    bridge.send_command("$I").await.unwrap();

    let sent = wait_for(&mut rx, |e| {
        matches!(e, AppEvent::Communication(CommunicationEvent::DataSent { .. }))
    })
    .await;
    assert_eq!(
        sent,
        AppEvent::Communication(CommunicationEvent::DataSent {
            data: "$I".to_string()
        })
    );

    let mut received = Vec::new();
    while received.len() < 3 {
        if let AppEvent::Communication(CommunicationEvent::DataReceived { data }) =
            wait_for(&mut rx, |e| {
                matches!(
                    e,
                    AppEvent::Communication(CommunicationEvent::DataReceived { .. })
                )
            })
            .await
        {
            received.push(data);
        }
    }
    assert_eq!(received, vec!["[VER:1.1h.20190825:]", "[OPT:V,15,128]", "ok"]);
}

#[tokio::test]
async fn test_error_response_is_structured() {
    let (bridge, _sim) = attached(test_config(), SimulatedGrbl::new()).await;

    let err = bridge.send_command("G7").await.unwrap_err();
    match err {
        Error::Controller(ControllerError::CommandRejected { code, message }) => {
            assert_eq!(code, 20);
            assert!(message.contains("Unsupported"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The bridge keeps working after a rejection.
    assert_eq!(bridge.send_command("G21").await.unwrap().response, "ok");
}

#[tokio::test]
async fn test_alarm_lock_and_unlock() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let mut rx = bridge.events().receiver();

    sim.trigger_alarm(1);
    let alarm = wait_for(&mut rx, |e| matches!(e, AppEvent::Machine(MachineEvent::AlarmTriggered { .. })))
        .await;
    let AppEvent::Machine(MachineEvent::AlarmTriggered { code, message }) = alarm else {
        unreachable!();
    };
    assert_eq!(code, 1);
    assert!(message.contains("Hard limit"));

    let err = bridge.send_command("G0 X1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::CommandRejected { code: 9, .. })
    ));

    let reply = bridge.unlock().await.unwrap();
    assert_eq!(reply.command, "$X");
    assert_eq!(reply.lines, vec!["[MSG:Caution: Unlocked]"]);
    assert!(!sim.is_alarm_locked());
}

#[tokio::test]
async fn test_timeout_then_recovery() {
    let config = BridgeConfig {
        command_timeout: Duration::from_millis(150),
        ..test_config()
    };
    let (bridge, sim) = attached(config, SimulatedGrbl::new()).await;
    let mut rx = bridge.events().receiver();

    sim.set_silent(true);
    let err = bridge.send_command("G0 X1").await.unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(
        err,
        Error::Controller(ControllerError::Timeout { timeout_ms: 150 })
    ));
    wait_for(&mut rx, |e| {
        matches!(e, AppEvent::Communication(CommunicationEvent::Timeout { .. }))
    })
    .await;

    // The controller catches up and acknowledges the first command late.
    sim.set_silent(false);
    sim.inject_line("ok");
    assert_eq!(bridge.send_command("G0 X2").await.unwrap().response, "ok");
}

#[tokio::test]
async fn test_late_reply_does_not_resolve_the_next_command() {
    let config = BridgeConfig {
        command_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let (bridge, sim) = attached(config, SimulatedGrbl::new()).await;
    let bridge = Arc::new(bridge);

    sim.set_silent(true);
    let err = bridge.send_command("G1 X100 F10").await.unwrap_err();
    assert!(err.is_timeout());

    let next = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send_command("G21").await })
    };
    tokio::time::timeout(Duration::from_secs(1), async {
        while !sim.received_lines().iter().any(|l| l == "G21") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("G21 written");

    // First the reply owed to G1, then the reply to G21.
    sim.inject_line("error:20");
    sim.inject_line("ok");

    let reply = next.await.unwrap().unwrap();
    assert_eq!(reply.command, "G21");
    assert_eq!(reply.response, "ok");
}

#[tokio::test]
async fn test_reset_forgets_owed_replies() {
    let config = BridgeConfig {
        command_timeout: Duration::from_millis(150),
        ..test_config()
    };
    let (bridge, sim) = attached(config, SimulatedGrbl::new()).await;

    sim.set_silent(true);
    assert!(bridge.send_command("G0 X1").await.unwrap_err().is_timeout());

    sim.set_silent(false);
    bridge.realtime(RealtimeCommand::SoftReset).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(bridge.send_command("G21").await.unwrap().response, "ok");
}

#[tokio::test]
async fn test_unsolicited_terminal_line_is_ignored() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let mut rx = bridge.events().receiver();

    sim.inject_line("error:3");
    wait_for(&mut rx, |e| {
        e == &AppEvent::Communication(CommunicationEvent::DataReceived {
            data: "error:3".to_string(),
        })
    })
    .await;

    let reply = bridge.send_command("G21").await.unwrap();
    assert_eq!(reply.response, "ok");
}

#[tokio::test]
async fn test_concurrent_commands_each_get_their_own_reply() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let bridge = Arc::new(bridge);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let bridge = bridge.clone();
        tasks.push(tokio::spawn(async move {
            bridge.send_command(&format!("G0 X{}", i)).await
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply.command, format!("G0 X{}", i));
        assert_eq!(reply.response, "ok");
    }

    let mut received = sim.received_lines();
    received.sort();
    let mut expected: Vec<String> = (0..8).map(|i| format!("G0 X{}", i)).collect();
    expected.sort();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_queue_limit_reports_busy() {
    let config = BridgeConfig {
        queue_depth: 1,
        command_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let (bridge, sim) = attached(config, SimulatedGrbl::new()).await;
    let bridge = Arc::new(bridge);
    sim.set_silent(true);

    let first = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send_command("G0 X1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bridge.pending_requests(), 1);

    let err = bridge.send_command("G0 X2").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::Busy { pending: 1 })
    ));

    assert!(first.await.unwrap().unwrap_err().is_timeout());
    assert_eq!(bridge.pending_requests(), 0);
}

#[tokio::test]
async fn test_status_jog_and_home() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let mut rx = bridge.events().receiver();

    bridge.send_command("G90 G0 X5 Y5").await.unwrap();
    let reply = bridge
        .jog(JogRequest {
            x: Some(1.0),
            y: None,
            z: Some(-0.5),
            feed_rate: 500.0,
        })
        .await
        .unwrap();
    assert_eq!(reply.command, "$J=G91 G21 X1.000 Z-0.500 F500");
    assert_eq!(sim.position(), [6.0, 5.0, -0.5]);

    let report = bridge.query_status().await.unwrap();
    assert!(report.is_idle());
    assert_eq!(report.machine_pos.x, 6.0);
    assert_eq!(report.machine_pos.z, -0.5);
    wait_for(&mut rx, |e| matches!(e, AppEvent::Machine(MachineEvent::StatusReport { .. })))
        .await;

    let reply = bridge.home().await.unwrap();
    assert_eq!(reply.command, "$H");
    wait_for(&mut rx, |e| e == &AppEvent::Machine(MachineEvent::HomingStarted)).await;
    assert_eq!(sim.position(), [0.0, 0.0, 0.0]);
}

#[tokio::test]
async fn test_jog_validation_never_reaches_the_port() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;

    let err = bridge
        .jog(JogRequest::new(0.0, 0.0, 0.0, 100.0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::InvalidCommand { .. })
    ));
    assert!(sim.received_lines().is_empty());
}

#[tokio::test]
async fn test_realtime_bypasses_queue() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;

    bridge.realtime(RealtimeCommand::FeedHold).await.unwrap();
    let report = bridge.query_status().await.unwrap();
    assert_eq!(report.state, "Hold:0");

    bridge.realtime(RealtimeCommand::CycleStart).await.unwrap();
    assert!(bridge.query_status().await.unwrap().is_idle());

    let realtime = sim.realtime_received();
    assert_eq!(realtime[0], RealtimeCommand::FeedHold);
    assert!(realtime.contains(&RealtimeCommand::CycleStart));
    assert!(sim.received_lines().is_empty());
}

#[tokio::test]
async fn test_status_query_times_out_when_silent() {
    let config = BridgeConfig {
        status_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let (bridge, sim) = attached(config, SimulatedGrbl::new()).await;
    sim.set_silent(true);

    let err = bridge.query_status().await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_unplugged_device_drops_connection() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let mut rx = bridge.events().receiver();

    sim.unplug();
    let event = wait_for(&mut rx, |e| matches!(e, AppEvent::Error(_))).await;
    let AppEvent::Error(error) = event else {
        unreachable!()
    };
    assert_eq!(error.source, "serial-io");
    assert!(error.message.starts_with("sim0"));

    let event = wait_for(&mut rx, |e| {
        matches!(e, AppEvent::Connection(ConnectionEvent::Disconnected { .. }))
    })
    .await;
    assert_eq!(
        event,
        AppEvent::Connection(ConnectionEvent::Disconnected {
            port: "sim0".to_string(),
            reason: DisconnectReason::ConnectionLost,
        })
    );
    assert_eq!(bridge.state(), BridgeState::Disconnected);

    let err = bridge.send_command("G0 X1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::NotConnected)
    ));

    // A fresh link can be attached in place of the dead one.
    bridge
        .attach(Box::new(SimulatedGrbl::new()), "sim1")
        .await
        .unwrap();
    assert_eq!(bridge.port_name().as_deref(), Some("sim1"));
}

#[tokio::test]
async fn test_attach_twice_is_rejected() {
    let (bridge, _sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let err = bridge
        .attach(Box::new(SimulatedGrbl::new()), "sim1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::AlreadyConnected { .. })
    ));
}

#[tokio::test]
async fn test_disconnect_publishes_user_requested() {
    let (bridge, _sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let mut rx = bridge.events().receiver();

    bridge.disconnect().await.unwrap();
    let event = wait_for(&mut rx, |e| matches!(e, AppEvent::Connection(_))).await;
    assert_eq!(
        event,
        AppEvent::Connection(ConnectionEvent::Disconnected {
            port: "sim0".to_string(),
            reason: DisconnectReason::UserRequested,
        })
    );
    assert!(bridge.send_command("G0").await.is_err());
}

#[tokio::test]
async fn test_supervisor_connects_when_disconnected() {
    let bridge = Arc::new(new_bridge(test_config()));
    let mut rx = bridge.events().receiver();
    let supervisor = bridge.spawn_supervisor(Duration::from_millis(50));

    wait_for(&mut rx, |e| {
        matches!(e, AppEvent::Connection(ConnectionEvent::Connected { .. }))
    })
    .await;
    assert!(bridge.state().is_connected());

    bridge.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bridge.state(), BridgeState::Disconnected);

    bridge.connect(ConnectOptions::default()).await.unwrap();
    assert!(bridge.state().is_connected());
    supervisor.abort();
}

#[tokio::test]
async fn test_disconnect_during_initialisation_wins() {
    let config = BridgeConfig {
        init_delay: Duration::from_millis(300),
        ..test_config()
    };
    let bridge = Arc::new(new_bridge(config));
    let mut rx = bridge.events().receiver();

    let connecting = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.connect(ConnectOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(bridge.state(), BridgeState::Disconnected);
    assert!(matches!(
        bridge.send_command("G21").await.unwrap_err(),
        Error::Connection(ConnectionError::NotConnected)
    ));

    bridge.disconnect().await.unwrap();
    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::ConnectionLost { .. })
    ));
    assert_eq!(bridge.state(), BridgeState::Disconnected);

    let mut connection_events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::Connection(event) = event {
            connection_events.push(event);
        }
    }
    assert!(matches!(
        connection_events.as_slice(),
        [
            ConnectionEvent::Connecting { .. },
            ConnectionEvent::ConnectionFailed { .. }
        ]
    ));

    // The explicit disconnect keeps the supervisor from reconnecting.
    let supervisor = bridge.spawn_supervisor(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bridge.state(), BridgeState::Disconnected);
    supervisor.abort();
}

#[tokio::test]
async fn test_supervisor_reconnects_as_soon_as_the_link_is_lost() {
    let (bridge, sim) = attached(test_config(), SimulatedGrbl::new()).await;
    let bridge = Arc::new(bridge);
    let mut rx = bridge.events().receiver();
    let supervisor = bridge.spawn_supervisor(Duration::from_secs(60));
    assert_eq!(bridge.events().subscriber_count(), 1);

    sim.unplug();
    wait_for(&mut rx, |e| {
        matches!(
            e,
            AppEvent::Connection(ConnectionEvent::Disconnected {
                reason: DisconnectReason::ConnectionLost,
                ..
            })
        )
    })
    .await;

    let event = wait_for(&mut rx, |e| {
        matches!(e, AppEvent::Connection(ConnectionEvent::Connected { .. }))
    })
    .await;
    assert_eq!(
        event,
        AppEvent::Connection(ConnectionEvent::Connected {
            port: "simulator".to_string()
        })
    );
    assert_eq!(bridge.send_command("G21").await.unwrap().response, "ok");
    supervisor.abort();
}
