//! End-to-end session flows driven through a scripted transport.

use cleaning_utility_ble::{
    AdapterState, CycleProgress, DeviceId, Error, Session, SessionCondition, SessionConfig,
    SessionEvent, SessionState, Transport, TransportEvent, WriteMode,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Disconnect,
    Write(Vec<u8>),
}

/// Transport that records every call and lets the test play the radio.
#[derive(Default)]
struct ScriptedTransport {
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl Transport for ScriptedTransport {
    fn start_scan(&self) {
        self.calls.lock().push(Call::StartScan);
    }

    fn stop_scan(&self) {
        self.calls.lock().push(Call::StopScan);
    }

    fn connect(&self, identifier: &DeviceId) {
        self.calls.lock().push(Call::Connect(identifier.clone()));
    }

    fn disconnect(&self) {
        self.calls.lock().push(Call::Disconnect);
    }

    fn write(&self, data: &[u8], _mode: WriteMode) {
        self.calls.lock().push(Call::Write(data.to_vec()));
    }
}

struct Fixture {
    session: Session,
    radio: mpsc::UnboundedSender<TransportEvent>,
    transport: Arc<ScriptedTransport>,
    events: broadcast::Receiver<SessionEvent>,
}

impl Fixture {
    fn new(config: SessionConfig) -> Self {
        let transport = Arc::new(ScriptedTransport::default());
        let (radio, rx) = mpsc::unbounded_channel();
        let session = Session::new(transport.clone(), rx, config).unwrap();
        let events = session.subscribe_events();

        Self {
            session,
            radio,
            transport,
            events,
        }
    }

    fn send(&self, event: TransportEvent) {
        self.radio.send(event).unwrap();
    }

    fn data(&self, text: &'static str) {
        self.send(TransportEvent::DataReceived(text.as_bytes().to_vec().into()));
    }

    /// Wait for the first event matching `pred`, skipping others.
    async fn wait_for(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let event = self.events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not published")
    }

    async fn wait_for_state(&mut self, state: SessionState) {
        self.wait_for(|e| matches!(e, SessionEvent::StateChanged { to, .. } if *to == state))
            .await;
    }

    async fn wait_for_progress(&mut self) -> CycleProgress {
        match self
            .wait_for(|e| matches!(e, SessionEvent::ProgressChanged(_)))
            .await
        {
            SessionEvent::ProgressChanged(progress) => progress,
            _ => unreachable!(),
        }
    }

    async fn connect_to(&mut self, identifier: &str) {
        self.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
        self.session.request_scan().await.unwrap();
        self.send(TransportEvent::PeripheralDiscovered {
            identifier: identifier.into(),
            name: Some("Cleaner".to_string()),
            rssi: Some(-50),
        });
        self.wait_for(|e| matches!(e, SessionEvent::DevicesChanged(d) if !d.is_empty()))
            .await;

        self.session.select_device(identifier).await.unwrap();
        self.send(TransportEvent::Connected(identifier.into()));
        self.wait_for_state(SessionState::Connected).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_cycle() {
    let mut f = Fixture::new(SessionConfig::default());

    f.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
    f.session.request_scan().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Scanning);

    f.send(TransportEvent::PeripheralDiscovered {
        identifier: "A".into(),
        name: Some("Cleaner A".to_string()),
        rssi: Some(-80),
    });
    f.send(TransportEvent::PeripheralDiscovered {
        identifier: "B".into(),
        name: Some("Cleaner B".to_string()),
        rssi: Some(-40),
    });
    f.wait_for(|e| matches!(e, SessionEvent::DevicesChanged(d) if d.len() == 2))
        .await;

    let ids: Vec<_> = f
        .session
        .devices()
        .into_iter()
        .map(|d| d.identifier.to_string())
        .collect();
    assert_eq!(ids, vec!["A", "B"]);

    f.session.select_device("B").await.unwrap();
    assert_eq!(f.session.state(), SessionState::Connecting);
    assert_eq!(
        f.session.selected_device().map(|d| d.identifier),
        Some(DeviceId::new("B"))
    );

    f.send(TransportEvent::Connected("B".into()));
    f.wait_for_state(SessionState::Connected).await;

    f.session.start_cycle().await.unwrap();

    f.data("p025");
    assert_eq!(f.wait_for_progress().await, CycleProgress::running(0.25));
    f.wait_for_state(SessionState::Running).await;
    assert_eq!(f.session.progress(), CycleProgress::running(0.25));

    f.data("p075");
    assert_eq!(f.wait_for_progress().await, CycleProgress::running(0.75));

    f.data("d");
    f.wait_for(|e| matches!(e, SessionEvent::CycleCompleted)).await;
    assert_eq!(f.session.state(), SessionState::Connected);
    assert_eq!(f.session.progress(), CycleProgress::complete());

    assert_eq!(
        f.transport.calls(),
        vec![
            Call::StartScan,
            Call::StopScan,
            Call::Connect(DeviceId::new("B")),
            Call::Write(b"1".to_vec()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_progress_published_before_running() {
    let mut f = Fixture::new(SessionConfig::default());
    f.connect_to("A").await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _handle = f.session.subscribe(move |event| match event {
        SessionEvent::ProgressChanged(_) | SessionEvent::StateChanged { .. } => {
            sink.lock().push(event.clone())
        }
        _ => {}
    });

    f.session.start_cycle().await.unwrap();
    f.data("p025");
    f.wait_for_state(SessionState::Running).await;

    assert_eq!(
        *seen.lock(),
        vec![
            SessionEvent::ProgressChanged(CycleProgress::running(0.25)),
            SessionEvent::StateChanged {
                from: SessionState::Connected,
                to: SessionState::Running,
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_short_progress_does_not_swallow_done() {
    let mut f = Fixture::new(SessionConfig::default());
    f.connect_to("A").await;
    f.session.start_cycle().await.unwrap();
    f.data("p010");
    f.wait_for_state(SessionState::Running).await;

    f.data("p5\n");
    f.wait_for(|e| {
        matches!(
            e,
            SessionEvent::Condition(SessionCondition::MalformedMessage { .. })
        )
    })
    .await;

    f.session.start_cycle().await.unwrap();
    f.data("p020");
    f.wait_for_state(SessionState::Running).await;
    f.data("d\n");
    f.wait_for(|e| matches!(e, SessionEvent::CycleCompleted)).await;
    assert_eq!(f.session.state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_fragmented_progress() {
    let mut f = Fixture::new(SessionConfig::default());
    f.connect_to("A").await;
    f.session.start_cycle().await.unwrap();

    f.data("p0");
    f.data("40p06");
    assert_eq!(f.wait_for_progress().await, CycleProgress::running(0.4));

    f.data("0");
    assert_eq!(f.wait_for_progress().await, CycleProgress::running(0.6));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_blocked_while_running() {
    let mut f = Fixture::new(SessionConfig::default());
    f.connect_to("A").await;
    f.session.start_cycle().await.unwrap();
    f.data("p010");
    f.wait_for_state(SessionState::Running).await;

    let err = f.session.disconnect().await.unwrap_err();
    assert!(matches!(err, Error::CycleInProgress));
    f.wait_for(|e| {
        matches!(
            e,
            SessionEvent::Condition(SessionCondition::CycleInProgressConflict)
        )
    })
    .await;
    assert_eq!(f.session.state(), SessionState::Running);

    f.session.force_disconnect().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Disconnecting);

    f.send(TransportEvent::Disconnected {
        identifier: "A".into(),
        reason: None,
    });
    f.wait_for_state(SessionState::Idle).await;
    assert_eq!(f.session.selected_device(), None);
    assert_eq!(f.session.progress(), CycleProgress::default());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_returns_to_idle() {
    let mut f = Fixture::new(SessionConfig::default().with_connect_timeout(Duration::from_secs(3)));

    f.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
    f.session.request_scan().await.unwrap();
    f.send(TransportEvent::PeripheralDiscovered {
        identifier: "A".into(),
        name: None,
        rssi: None,
    });
    f.wait_for(|e| matches!(e, SessionEvent::DevicesChanged(d) if !d.is_empty()))
        .await;
    f.session.select_device("A").await.unwrap();

    let condition = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let SessionEvent::Condition(c) = f.events.recv().await.unwrap() {
                return c;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        condition,
        SessionCondition::ConnectTimeout {
            identifier: DeviceId::new("A")
        }
    );
    assert_eq!(f.session.state(), SessionState::Idle);
    assert_eq!(
        f.transport
            .calls()
            .iter()
            .filter(|c| **c == Call::Disconnect)
            .count(),
        1
    );

    // A late connection after the timeout is rejected.
    f.send(TransportEvent::Connected("A".into()));
    f.session.request_scan().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Scanning);
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_disconnect() {
    let mut f = Fixture::new(SessionConfig::default());
    f.connect_to("A").await;

    f.send(TransportEvent::Disconnected {
        identifier: "A".into(),
        reason: Some("link lost".to_string()),
    });

    let event = f
        .wait_for(|e| matches!(e, SessionEvent::Condition(_)))
        .await;
    assert_eq!(
        event,
        SessionEvent::Condition(SessionCondition::UnsolicitedDisconnect {
            identifier: DeviceId::new("A"),
            reason: Some("link lost".to_string()),
        })
    );
    assert_eq!(f.session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message() {
    let mut f = Fixture::new(SessionConfig::default());
    f.connect_to("A").await;

    f.data("x\n");
    let event = f
        .wait_for(|e| matches!(e, SessionEvent::Condition(_)))
        .await;
    assert_eq!(
        event,
        SessionEvent::Condition(SessionCondition::MalformedMessage {
            raw: "x".to_string()
        })
    );
    assert_eq!(f.session.state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_scan_deferred_until_powered_on() {
    let mut f = Fixture::new(SessionConfig::default());

    f.session.request_scan().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Idle);
    assert!(f.transport.calls().is_empty());

    f.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
    f.wait_for_state(SessionState::Scanning).await;
    assert_eq!(f.transport.calls(), vec![Call::StartScan]);
}

#[tokio::test(start_paused = true)]
async fn test_adapter_powered_off_while_connected() {
    let mut f = Fixture::new(SessionConfig::default());
    f.connect_to("A").await;

    f.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOff));
    f.wait_for_state(SessionState::Idle).await;
    assert_eq!(f.session.adapter_state(), AdapterState::PoweredOff);

    let err = f.session.request_scan().await.unwrap_err();
    assert!(matches!(
        err,
        Error::AdapterUnavailable {
            state: AdapterState::PoweredOff
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_select_after_deferred_scan_times_out() {
    let mut f = Fixture::new(SessionConfig::default());

    // Adapter state not reported yet, the scan waits for it.
    f.session.request_scan().await.unwrap();
    f.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
    f.send(TransportEvent::PeripheralDiscovered {
        identifier: "A".into(),
        name: None,
        rssi: Some(-60),
    });

    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let SessionEvent::Condition(SessionCondition::ScanTimeout) =
                f.events.recv().await.unwrap()
            {
                break;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(f.session.state(), SessionState::Idle);
    assert_eq!(f.session.devices().len(), 1);

    // Subscribing just before selecting sees only the connection.
    let mut connect_events = f.session.subscribe_events();
    f.session.select_device("A").await.unwrap();
    f.send(TransportEvent::Connected("A".into()));

    let mut states = Vec::new();
    while states.last() != Some(&SessionState::Connected) {
        if let SessionEvent::StateChanged { to, .. } = connect_events.recv().await.unwrap() {
            states.push(to);
        }
    }
    assert_eq!(
        states,
        vec![SessionState::Connecting, SessionState::Connected]
    );
}
