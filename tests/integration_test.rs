use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::oneshot, time::sleep};

// Import the application modules
use pstryk_energy_meter::{
    config::{ConfigEntry, ConfigStore, EntryData},
    config_flow::{ConfigFlow, FlowResult, SetupForm},
    data_point::{DataPointState, Unit},
    integration::{Hub, Integration},
    ClientSettings, ErrorKind,
};

/// Mock Pstryk meter serving `/info` and `/state`
struct MockMeter {
    info: Mutex<Value>,
    sensors: Mutex<Value>,
    info_requests: AtomicU32,
    state_requests: AtomicU32,
    should_fail: AtomicBool,
    state_should_fail: AtomicBool,
}

impl MockMeter {
    fn new() -> Self {
        Self {
            info: Mutex::new(json!({
                "device": {
                    "id": "ABC123",
                    "product": "PstrykEnergyMeter",
                    "type": "multiSensor",
                    "hv": "1.0",
                    "fv": "2.1"
                }
            })),
            sensors: Mutex::new(json!([
                {"type": "voltage", "id": 1, "value": 2305}
            ])),
            info_requests: AtomicU32::new(0),
            state_requests: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
            state_should_fail: AtomicBool::new(false),
        }
    }

    fn set_sensors(&self, sensors: Value) {
        *self.sensors.lock().unwrap() = sensors;
    }

    fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    fn get_state_requests(&self) -> u32 {
        self.state_requests.load(Ordering::Relaxed)
    }

    fn create_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/info", get(info_handler))
            .route("/state", get(state_handler))
            .with_state(self)
    }
}

async fn info_handler(State(meter): State<Arc<MockMeter>>) -> Result<Json<Value>, StatusCode> {
    meter.info_requests.fetch_add(1, Ordering::Relaxed);
    if meter.should_fail.load(Ordering::Relaxed) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(meter.info.lock().unwrap().clone()))
}

async fn state_handler(State(meter): State<Arc<MockMeter>>) -> Result<Json<Value>, StatusCode> {
    meter.state_requests.fetch_add(1, Ordering::Relaxed);
    if meter.should_fail.load(Ordering::Relaxed)
        || meter.state_should_fail.load(Ordering::Relaxed)
    {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({
        "multiSensor": {
            "sensors": meter.sensors.lock().unwrap().clone()
        }
    })))
}

/// Start mock meter HTTP server
async fn start_mock_meter() -> (Arc<MockMeter>, SocketAddr, oneshot::Sender<()>) {
    let mock_meter = Arc::new(MockMeter::new());
    let app = mock_meter.clone().create_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let server = axum::serve(listener, app);
        tokio::select! {
            _ = server => {},
            _ = shutdown_rx => {
                println!("Mock meter shutting down");
            }
        }
    });

    (mock_meter, addr, shutdown_tx)
}

fn entry_for(addr: SocketAddr) -> ConfigEntry {
    ConfigEntry::new(
        "PstrykEnergyMeter",
        "ABC123",
        EntryData {
            name: "Meter".into(),
            host: addr.to_string(),
        },
    )
}

fn full_sensor_list() -> Value {
    let mut sensors = Vec::new();
    for id in 1..=3 {
        sensors.push(json!({"type": "voltage", "id": id, "value": 2300 + id}));
        sensors.push(json!({"type": "current", "id": id, "value": 1000 * id}));
    }
    for id in 0..=3 {
        sensors.push(json!({"type": "activePower", "id": id, "value": 100 * id}));
        sensors.push(json!({"type": "forwardActiveEnergy", "id": id, "value": 123456}));
        sensors.push(json!({"type": "reverseActiveEnergy", "id": id, "value": 500}));
        sensors.push(json!({"type": "frequency", "id": id, "value": 5000}));
    }
    Value::Array(sensors)
}

#[tokio::test]
async fn test_setup_and_first_reading() {
    let (_meter, addr, _shutdown) = start_mock_meter().await;
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConfigStore::open(dir.path().join("entries.json")).unwrap();

    // Setup form validates against /info and assigns the serial as unique id
    let result = ConfigFlow::new(ClientSettings::default())
        .submit(
            SetupForm {
                name: "Meter".into(),
                host: addr.to_string(),
            },
            &store,
        )
        .await;
    let FlowResult::CreateEntry(entry) = result else {
        panic!("Expected setup to succeed");
    };
    assert_eq!(entry.unique_id, "ABC123");
    store.add(&entry);
    store.save().unwrap();

    let integration = Integration::setup(entry, ClientSettings::default())
        .await
        .expect("Integration should set up");

    assert_eq!(integration.data_points().len(), 18);
    let voltage = integration.data_point("voltage_1").unwrap();
    assert_eq!(voltage.state(), DataPointState::Value(230.5));
    assert_eq!(voltage.descriptor().unit, Unit::Volt);
    assert_eq!(voltage.name(), "Pstryk Energy Meter Voltage 1");

    // Channels the meter never reported read as unknown
    let current = integration.data_point("current_2").unwrap();
    assert_eq!(current.state(), DataPointState::Unknown);

    assert_eq!(integration.device().model.as_deref(), Some("1.0"));
    integration.unload().await;
}

#[tokio::test]
async fn test_all_data_points_convert_units() {
    let (meter, addr, _shutdown) = start_mock_meter().await;
    meter.set_sensors(full_sensor_list());

    let integration = Integration::setup(entry_for(addr), ClientSettings::default())
        .await
        .unwrap();

    let state = |key: &str| integration.data_point(key).unwrap().state();
    assert_eq!(state("voltage_3"), DataPointState::Value(230.3));
    assert_eq!(state("current_2"), DataPointState::Value(2000.0));
    assert_eq!(state("activePower_0"), DataPointState::Value(0.0));
    assert_eq!(state("activePower_3"), DataPointState::Value(300.0));
    assert_eq!(state("forwardActiveEnergy_0"), DataPointState::Value(123.456));
    assert_eq!(state("reverseActiveEnergy_2"), DataPointState::Value(0.5));
    assert!(integration
        .data_points()
        .iter()
        .all(|point| matches!(point.state(), DataPointState::Value(_))));

    integration.unload().await;
}

#[tokio::test]
async fn test_setup_fails_when_first_poll_fails() {
    let (meter, addr, _shutdown) = start_mock_meter().await;
    meter.state_should_fail.store(true, Ordering::Relaxed);

    let result = Integration::setup(entry_for(addr), ClientSettings::default()).await;

    assert_eq!(result.err().map(|err| err.kind()), Some(ErrorKind::Protocol));
    assert_eq!(meter.info_requests.load(Ordering::Relaxed), 1);
    assert_eq!(meter.get_state_requests(), 1);
}

#[tokio::test]
async fn test_setup_fails_when_meter_is_gone() {
    let (_meter, addr, shutdown) = start_mock_meter().await;
    shutdown.send(()).unwrap();
    sleep(Duration::from_millis(50)).await;

    let mut hub = Hub::new(ClientSettings::default());
    let result = hub.setup_entry(entry_for(addr)).await;

    assert_eq!(
        result.err().map(|err| err.kind()),
        Some(ErrorKind::Connection)
    );
    assert!(hub.is_empty());
}

#[tokio::test]
async fn test_unavailable_then_recovered() {
    let (meter, addr, _shutdown) = start_mock_meter().await;
    let integration = Integration::setup(entry_for(addr), ClientSettings::default())
        .await
        .unwrap();
    let voltage = integration.data_point("voltage_1").unwrap().clone();

    let updates = Arc::new(Mutex::new(Vec::new()));
    let recorded = updates.clone();
    let _subscription = voltage.subscribe(move |_, state| {
        recorded.lock().unwrap().push(state);
    });

    meter.set_should_fail(true);
    let _ = integration.coordinator().refresh().await;
    assert_eq!(voltage.state(), DataPointState::Unavailable);
    // Stale data stays readable underneath
    assert_eq!(integration.coordinator().current_value("voltage_1"), Some(2305));

    meter.set_should_fail(false);
    meter.set_sensors(json!([{"type": "voltage", "id": 1, "value": 2290}]));
    integration.coordinator().refresh().await.unwrap();
    assert_eq!(voltage.state(), DataPointState::Value(229.0));

    assert_eq!(
        *updates.lock().unwrap(),
        vec![DataPointState::Unavailable, DataPointState::Value(229.0)]
    );
    integration.unload().await;
}

#[tokio::test]
async fn test_hub_lifecycle() {
    let (meter, addr, _shutdown) = start_mock_meter().await;
    let mut hub = Hub::new(ClientSettings::default());
    let entry = entry_for(addr);
    let entry_id = entry.entry_id.clone();

    hub.setup_entry(entry.clone()).await.unwrap();
    assert_eq!(hub.len(), 1);

    // Setting up the same entry again replaces the running one
    hub.setup_entry(entry).await.unwrap();
    assert_eq!(hub.len(), 1);

    let subscription = hub
        .get(&entry_id)
        .unwrap()
        .data_point("activePower_0")
        .unwrap()
        .subscribe(|_, _| {});

    assert!(hub.unload_entry(&entry_id).await);
    assert!(!hub.unload_entry(&entry_id).await);
    assert!(hub.is_empty());

    // Disposing a subscription after teardown is harmless
    drop(subscription);

    let polls = meter.get_state_requests();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(meter.get_state_requests(), polls);
}

#[tokio::test]
async fn test_info_read_once_per_setup() {
    let (meter, addr, _shutdown) = start_mock_meter().await;

    let integration = Integration::setup(entry_for(addr), ClientSettings::default())
        .await
        .unwrap();
    integration.coordinator().refresh().await.unwrap();
    integration.coordinator().refresh().await.unwrap();

    assert_eq!(meter.info_requests.load(Ordering::Relaxed), 1);
    assert_eq!(meter.get_state_requests(), 3);
    integration.unload().await;
}

#[tokio::test]
async fn test_setup_rejects_device_that_changed_product() {
    let (meter, addr, _shutdown) = start_mock_meter().await;
    *meter.info.lock().unwrap() = json!({
        "device": {"id": "ABC123", "product": "Toaster", "type": "multiSensor"}
    });

    let result = Integration::setup(entry_for(addr), ClientSettings::default()).await;

    assert_eq!(
        result.err().map(|err| err.kind()),
        Some(ErrorKind::Validation)
    );
    assert_eq!(meter.get_state_requests(), 0);
}
