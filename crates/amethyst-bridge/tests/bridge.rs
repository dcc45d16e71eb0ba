//! Bridge lifecycle against a real driver process surface.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use amethyst_bridge::{DriverBridge, ServiceStatus, VrHost};
use amethyst_driver::{Driver, DriverConfig, LoggingHost};
use amethyst_rpc::protocol::result_for;
use amethyst_rpc::{
    Endpoint, Quaternion, RpcConfig, TrackerRole, TrackerState, TrackerUpdate, Vector3,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Default)]
struct FakeVr {
    input_broken: AtomicBool,
    polling: AtomicBool,
    poll_delay_ms: AtomicUsize,
    polls: AtomicUsize,
    overlapped_shutdowns: AtomicUsize,
    shutdowns: AtomicUsize,
    restarts: Mutex<Vec<String>>,
    restarts_during_poll: AtomicUsize,
}

impl VrHost for FakeVr {
    fn start_vr(&self) -> bool {
        true
    }

    fn start_input_actions(&self) -> bool {
        !self.input_broken.load(Ordering::SeqCst)
    }

    fn poll_input(&self) {
        self.polling.store(true, Ordering::SeqCst);
        let delay = self.poll_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.polling.store(false, Ordering::SeqCst);
    }

    fn request_restart(&self, reason: &str) -> bool {
        if self.polling.load(Ordering::SeqCst) {
            self.restarts_during_poll.fetch_add(1, Ordering::SeqCst);
        }
        self.restarts.lock().unwrap().push(reason.to_string());
        true
    }

    fn shutdown_vr(&self) {
        if self.polling.load(Ordering::SeqCst) {
            self.overlapped_shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

struct RunningDriver {
    endpoint: Endpoint,
    host: Arc<LoggingHost>,
    plugins: amethyst_driver::PluginLinks,
    stop: oneshot::Sender<()>,
    task: JoinHandle<amethyst_driver::DriverResult<()>>,
}

impl RunningDriver {
    async fn start(endpoint: Endpoint) -> Self {
        let config = DriverConfig {
            rpc: RpcConfig::default().with_endpoint(endpoint),
            frame_hz: 120,
            trackers: vec![TrackerRole::Waist, TrackerRole::LeftFoot],
        };
        let host = Arc::new(LoggingHost::new());
        let driver = Driver::bind(config, Arc::clone(&host)).await.unwrap();
        let endpoint = driver.local_endpoint();
        let plugins = driver.plugins();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(driver.run_until(async move {
            let _ = stopped.await;
        }));
        Self {
            endpoint,
            host,
            plugins,
            stop,
            task,
        }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

fn bridge_for(endpoint: Endpoint, vr: Arc<FakeVr>) -> DriverBridge<FakeVr> {
    let mut config = RpcConfig::default().with_endpoint(endpoint);
    config.connect_timeout_ms = 500;
    config.call_timeout_ms = 1000;
    DriverBridge::new(vr, config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initialize_drives_trackers_end_to_end() {
    let driver = RunningDriver::start(Endpoint::tcp_loopback(0)).await;
    let vr = Arc::new(FakeVr::default());
    let bridge = bridge_for(driver.endpoint.clone(), Arc::clone(&vr));

    assert_eq!(bridge.initialize().await, ServiceStatus::Ok);
    assert!(bridge.is_initialized().await);

    let results = bridge
        .set_tracker_states(vec![
            TrackerState::new(TrackerRole::Waist, true),
            TrackerState::new(TrackerRole::Chest, true),
        ])
        .await;
    assert_eq!(result_for(&results, TrackerRole::Waist), Some(true));
    assert_eq!(result_for(&results, TrackerRole::Chest), Some(false));
    assert_eq!(driver.host.device_count(), 1);

    assert!(
        bridge
            .update_tracker_poses(vec![TrackerUpdate::new(TrackerRole::Waist)
                .with_pose(Vector3::new(0.1, 0.9, 0.0), Quaternion::IDENTITY)])
            .await
    );
    let acked = bridge
        .update_tracker_poses_acked(vec![TrackerUpdate::new(TrackerRole::Waist)])
        .await;
    assert_eq!(result_for(&acked, TrackerRole::Waist), Some(true));

    let test = bridge.test_connection().await;
    assert_eq!(test.status, ServiceStatus::Ok);
    assert_eq!(test.message, "OK");
    assert!(test.ping.is_some());

    assert_eq!(driver.plugins.request_vr_restart("driver update").await, 1);
    assert_eq!(*vr.restarts.lock().unwrap(), vec!["driver update".to_string()]);

    bridge.shutdown().await;
    assert_eq!(bridge.status().await, ServiceStatus::VrNotReady);
    assert_eq!(vr.shutdowns.load(Ordering::SeqCst), 1);
    assert!(bridge
        .set_tracker_states(vec![TrackerState::new(TrackerRole::Waist, false)])
        .await
        .is_empty());

    driver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn input_failure_is_reported_after_driver_health() {
    let driver = RunningDriver::start(Endpoint::tcp_loopback(0)).await;
    let vr = Arc::new(FakeVr::default());
    vr.input_broken.store(true, Ordering::SeqCst);
    let bridge = bridge_for(driver.endpoint.clone(), vr);

    assert_eq!(bridge.initialize().await, ServiceStatus::InputActionsFailed);
    assert_eq!(bridge.status().await, ServiceStatus::Ok);

    bridge.shutdown().await;
    driver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_notices_lost_driver_and_refresh_recovers() {
    let driver = RunningDriver::start(Endpoint::tcp_loopback(0)).await;
    let endpoint = driver.endpoint.clone();
    let bridge = bridge_for(endpoint.clone(), Arc::new(FakeVr::default()));
    assert_eq!(bridge.initialize().await, ServiceStatus::Ok);

    driver.stop().await;

    timeout(Duration::from_secs(5), async {
        loop {
            bridge.heartbeat().await;
            if bridge.status().await == ServiceStatus::Unreachable {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bridge never noticed the driver going away");
    assert!(!bridge.update_tracker_poses(Vec::new()).await);

    let driver = RunningDriver::start(endpoint).await;
    assert_eq!(bridge.refresh().await, ServiceStatus::Ok);
    assert_eq!(bridge.test_connection().await.status, ServiceStatus::Ok);

    bridge.shutdown().await;
    driver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_waits_for_running_heartbeat() {
    let vr = Arc::new(FakeVr::default());
    let mut config = RpcConfig::default().with_endpoint(Endpoint::tcp_loopback(1));
    config.connect_timeout_ms = 200;
    let bridge = Arc::new(DriverBridge::new(Arc::clone(&vr), config));
    assert_eq!(bridge.initialize().await, ServiceStatus::Unreachable);

    vr.poll_delay_ms.store(150, Ordering::SeqCst);
    let beat = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.heartbeat().await })
    };
    timeout(Duration::from_secs(5), async {
        while !vr.polling.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("heartbeat never started polling");
    bridge.shutdown().await;
    beat.await.unwrap();

    assert_eq!(vr.polls.load(Ordering::SeqCst), 1);
    assert_eq!(vr.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(vr.overlapped_shutdowns.load(Ordering::SeqCst), 0);

    bridge.heartbeat().await;
    assert_eq!(vr.polls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frozen_driver_is_dropped_and_shutdown_stays_prompt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let frozen = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        stream
    });

    let vr = Arc::new(FakeVr::default());
    let bridge = bridge_for(Endpoint::tcp_loopback(port), Arc::clone(&vr));
    let status = timeout(Duration::from_secs(5), bridge.initialize())
        .await
        .expect("initialize hung on a frozen driver");
    assert_eq!(status, ServiceStatus::Unreachable);

    // The timed-out session was closed, so the frozen side sees end of stream.
    let mut stream = frozen.await.unwrap();
    let mut seen = Vec::new();
    timeout(Duration::from_secs(3), stream.read_to_end(&mut seen))
        .await
        .expect("bridge kept the dead session open")
        .unwrap();
    assert!(!seen.is_empty());

    timeout(Duration::from_secs(3), bridge.shutdown())
        .await
        .expect("shutdown hung");
    assert_eq!(vr.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_request_is_not_blocked_by_a_slow_heartbeat() {
    let driver = RunningDriver::start(Endpoint::tcp_loopback(0)).await;
    let vr = Arc::new(FakeVr::default());
    let bridge = Arc::new(bridge_for(driver.endpoint.clone(), Arc::clone(&vr)));
    assert_eq!(bridge.initialize().await, ServiceStatus::Ok);

    vr.poll_delay_ms.store(500, Ordering::SeqCst);
    let beat = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.heartbeat().await })
    };
    timeout(Duration::from_secs(5), async {
        while !vr.polling.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("heartbeat never started polling");

    assert_eq!(driver.plugins.request_vr_restart("mid-poll").await, 1);
    assert_eq!(vr.restarts_during_poll.load(Ordering::SeqCst), 1);

    beat.await.unwrap();
    vr.poll_delay_ms.store(0, Ordering::SeqCst);
    bridge.shutdown().await;
    driver.stop().await;
}
