//! 设备在线状态监控
//!
//! 设备端周期性上报心跳，这里有一个后台循环定期扫描在线设备，
//! 把心跳超龄的设备标记为离线并广播状态事件。扫描出错只记日志，
//! 循环继续跑。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{Result, SmsRelayError};
use crate::storage::dao::DeviceDao;
use crate::storage::SmsStore;

/// 设备上下线事件
#[derive(Debug, Clone)]
pub enum LivenessEvent {
    Online { device_id: i64, device_key: String },
    Offline { device_id: i64, device_key: String },
}

/// 在线状态监控器
pub struct PresenceMonitor {
    store: SmsStore,
    config: RelayConfig,
    events: broadcast::Sender<LivenessEvent>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceMonitor {
    pub fn new(store: SmsStore, config: RelayConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            config,
            events,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// 订阅上下线事件
    pub fn subscribe(&self) -> broadcast::Receiver<LivenessEvent> {
        self.events.subscribe()
    }

    /// 启动后台扫描循环，重复调用无效果
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let store = self.store.clone();
        let events = self.events.clone();
        let running = self.running.clone();
        let interval = self.config.monitor_interval;
        let threshold_ms = self.config.offline_threshold.as_millis() as i64;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!("设备监控循环启动, 间隔 {:?}", interval);
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                match Self::sweep_once(&store, threshold_ms, &events) {
                    Ok(0) => {}
                    Ok(n) => info!("本轮标记 {} 台设备离线", n),
                    Err(e) => warn!("设备扫描失败: {}", e),
                }
            }
            debug!("设备监控循环退出");
        });
        *self.handle.lock() = Some(handle);
    }

    /// 停止后台循环
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// 记录一次设备心跳。设备若原先离线则置回在线并广播事件。
    pub fn heartbeat(&self, device_key: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let (device_id, key, was_online) = self.store.with_conn(|conn| {
            let dao = DeviceDao::new(conn);
            let device = dao
                .get_by_key(device_key)?
                .ok_or_else(|| SmsRelayError::NotFound(format!("设备不存在: {}", device_key)))?;
            let id = device
                .id
                .ok_or_else(|| SmsRelayError::InvalidData("设备缺少 id".to_string()))?;
            dao.record_heartbeat(id, now)?;
            Ok((id, device.device_key, device.is_online))
        })?;

        if !was_online {
            info!("设备 {} 恢复在线", key);
            let _ = self.events.send(LivenessEvent::Online {
                device_id,
                device_key: key,
            });
        }
        Ok(())
    }

    /// 扫描一轮：心跳超过阈值（或从未上报）的在线设备标记为离线
    fn sweep_once(
        store: &SmsStore,
        threshold_ms: i64,
        events: &broadcast::Sender<LivenessEvent>,
    ) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let stale = store.with_conn(|conn| {
            let dao = DeviceDao::new(conn);
            let mut flipped = Vec::new();
            for device in dao.list_online()? {
                let alive = device
                    .last_heartbeat
                    .map(|at| now - at <= threshold_ms)
                    .unwrap_or(false);
                if alive {
                    continue;
                }
                if let Some(id) = device.id {
                    dao.set_online(id, false)?;
                    flipped.push((id, device.device_key));
                }
            }
            Ok(flipped)
        })?;

        for (device_id, device_key) in &stale {
            let _ = events.send(LivenessEvent::Offline {
                device_id: *device_id,
                device_key: device_key.clone(),
            });
        }
        Ok(stale.len())
    }
}

impl Drop for PresenceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_tracing, insert_device};

    fn monitor_with_device(key: &str) -> (PresenceMonitor, i64) {
        init_tracing();
        let store = SmsStore::open_in_memory().unwrap();
        let device_id = store.with_conn(|conn| Ok(insert_device(conn, key))).unwrap();
        (PresenceMonitor::new(store, RelayConfig::default()), device_id)
    }

    #[tokio::test]
    async fn test_stale_device_goes_offline_and_event_fires() {
        let (monitor, device_id) = monitor_with_device("dev-001");
        let mut events = monitor.subscribe();

        // 默认 insert_device 的心跳是 0，远超离线阈值
        let flipped = PresenceMonitor::sweep_once(
            &monitor.store,
            monitor.config.offline_threshold.as_millis() as i64,
            &monitor.events,
        )
        .unwrap();
        assert_eq!(flipped, 1);

        monitor
            .store
            .with_conn(|conn| {
                let device = DeviceDao::new(conn).get_by_id(device_id)?.unwrap();
                assert!(!device.is_online);
                Ok(())
            })
            .unwrap();

        match events.try_recv().unwrap() {
            LivenessEvent::Offline { device_key, .. } => assert_eq!(device_key, "dev-001"),
            other => panic!("意外事件: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fresh_heartbeat_keeps_device_online() {
        let (monitor, device_id) = monitor_with_device("dev-002");
        monitor.heartbeat("dev-002").unwrap();

        let flipped = PresenceMonitor::sweep_once(
            &monitor.store,
            monitor.config.offline_threshold.as_millis() as i64,
            &monitor.events,
        )
        .unwrap();
        assert_eq!(flipped, 0);

        monitor
            .store
            .with_conn(|conn| {
                let device = DeviceDao::new(conn).get_by_id(device_id)?.unwrap();
                assert!(device.is_online);
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_revives_offline_device() {
        let (monitor, device_id) = monitor_with_device("dev-003");
        monitor
            .store
            .with_conn(|conn| DeviceDao::new(conn).set_online(device_id, false))
            .unwrap();

        let mut events = monitor.subscribe();
        monitor.heartbeat("dev-003").unwrap();

        monitor
            .store
            .with_conn(|conn| {
                let device = DeviceDao::new(conn).get_by_id(device_id)?.unwrap();
                assert!(device.is_online);
                Ok(())
            })
            .unwrap();

        match events.try_recv().unwrap() {
            LivenessEvent::Online { device_key, .. } => assert_eq!(device_key, "dev-003"),
            other => panic!("意外事件: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_device_heartbeat_is_not_found() {
        let (monitor, _) = monitor_with_device("dev-004");
        let err = monitor.heartbeat("no-such-device").unwrap_err();
        assert!(matches!(err, SmsRelayError::NotFound(_)));
    }
}
