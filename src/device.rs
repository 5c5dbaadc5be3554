//! 设备注册表
//!
//! 维护已知设备列表与当前选中设备。状态变更来自两条路径：
//! 用户操作（选择、增删）与消息链路的 device_status 推送，
//! 两者都串行经过这里的写操作。

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 设备操作系统
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceOs {
    Ios,
    Android,
    Harmonyos,
}

/// 设备在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// 受控设备
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub model: String,
    pub os: DeviceOs,
    pub status: DeviceStatus,
    /// 最近一次上线时间（毫秒时间戳）
    pub connected_at: Option<i64>,
    pub ip: Option<String>,
    pub port: Option<u16>,
}

/// 设备注册表：设备列表 + 选中指针
pub struct DeviceRegistry {
    devices: RwLock<Vec<Device>>,
    selected: RwLock<Option<String>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
            selected: RwLock::new(None),
        }
    }

    /// 预置演示设备（控制台可离线试用），默认选中第一台
    pub fn demo() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let devices = vec![
            Device {
                id: "1".to_string(),
                name: "iPhone 15 Pro".to_string(),
                model: "iPhone 15 Pro".to_string(),
                os: DeviceOs::Ios,
                status: DeviceStatus::Online,
                connected_at: Some(now - 3_600_000),
                ip: Some("192.168.1.101".to_string()),
                port: Some(5555),
            },
            Device {
                id: "2".to_string(),
                name: "Xiaomi 14".to_string(),
                model: "Xiaomi 14".to_string(),
                os: DeviceOs::Android,
                status: DeviceStatus::Online,
                connected_at: Some(now - 7_200_000),
                ip: Some("192.168.1.102".to_string()),
                port: Some(5555),
            },
            Device {
                id: "3".to_string(),
                name: "Mate 60 Pro".to_string(),
                model: "Mate 60 Pro".to_string(),
                os: DeviceOs::Harmonyos,
                status: DeviceStatus::Offline,
                connected_at: None,
                ip: Some("192.168.1.103".to_string()),
                port: Some(5555),
            },
            Device {
                id: "4".to_string(),
                name: "iPad Pro 12.9".to_string(),
                model: "iPad Pro 12.9".to_string(),
                os: DeviceOs::Ios,
                status: DeviceStatus::Online,
                connected_at: Some(now - 1_800_000),
                ip: Some("192.168.1.104".to_string()),
                port: Some(5555),
            },
            Device {
                id: "5".to_string(),
                name: "Samsung S24 Ultra".to_string(),
                model: "Samsung Galaxy S24 Ultra".to_string(),
                os: DeviceOs::Android,
                status: DeviceStatus::Offline,
                connected_at: None,
                ip: Some("192.168.1.105".to_string()),
                port: Some(5555),
            },
        ];
        Self {
            devices: RwLock::new(devices),
            selected: RwLock::new(Some("1".to_string())),
        }
    }

    pub async fn select_device(&self, device_id: &str) {
        *self.selected.write().await = Some(device_id.to_string());
    }

    pub async fn selected_device_id(&self) -> Option<String> {
        self.selected.read().await.clone()
    }

    pub async fn selected_device(&self) -> Option<Device> {
        let selected = self.selected.read().await.clone()?;
        self.get(&selected).await
    }

    /// 更新设备状态；置为 online 时刷新上线时间
    pub async fn update_status(&self, device_id: &str, status: DeviceStatus) {
        let mut devices = self.devices.write().await;
        if let Some(device) = devices.iter_mut().find(|d| d.id == device_id) {
            device.status = status;
            if status == DeviceStatus::Online {
                device.connected_at = Some(chrono::Utc::now().timestamp_millis());
            }
        }
    }

    pub async fn update_name(&self, device_id: &str, name: &str) {
        let mut devices = self.devices.write().await;
        if let Some(device) = devices.iter_mut().find(|d| d.id == device_id) {
            device.name = name.to_string();
        }
    }

    /// 登记新设备，返回分配的 ID
    pub async fn add_device(&self, mut device: Device) -> String {
        device.id = format!("device_{}", uuid::Uuid::new_v4());
        let id = device.id.clone();
        self.devices.write().await.push(device);
        id
    }

    /// 移除设备；若它恰是选中设备则清除选中
    pub async fn remove_device(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|d| d.id != device_id);
        let removed = devices.len() < before;
        drop(devices);

        if removed {
            let mut selected = self.selected.write().await;
            if selected.as_deref() == Some(device_id) {
                *selected = None;
            }
        }
        removed
    }

    pub async fn get(&self, device_id: &str) -> Option<Device> {
        self.devices
            .read()
            .await
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    pub async fn all(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    pub async fn online_devices(&self) -> Vec<Device> {
        self.devices
            .read()
            .await
            .iter()
            .filter(|d| d.status == DeviceStatus::Online)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_seed_and_selection() {
        let registry = DeviceRegistry::demo();
        assert_eq!(registry.all().await.len(), 5);
        assert_eq!(registry.online_devices().await.len(), 3);

        let selected = registry.selected_device().await.expect("默认选中");
        assert_eq!(selected.name, "iPhone 15 Pro");

        registry.select_device("3").await;
        let selected = registry.selected_device().await.expect("选中 Mate");
        assert_eq!(selected.os, DeviceOs::Harmonyos);
    }

    #[tokio::test]
    async fn test_update_status_stamps_connected_at() {
        let registry = DeviceRegistry::demo();
        let before = registry.get("3").await.expect("存在");
        assert_eq!(before.status, DeviceStatus::Offline);
        assert!(before.connected_at.is_none());

        registry.update_status("3", DeviceStatus::Online).await;
        let after = registry.get("3").await.expect("存在");
        assert_eq!(after.status, DeviceStatus::Online);
        assert!(after.connected_at.is_some());

        // 离线不会清掉上线时间
        registry.update_status("3", DeviceStatus::Offline).await;
        let offline = registry.get("3").await.expect("存在");
        assert_eq!(offline.status, DeviceStatus::Offline);
        assert!(offline.connected_at.is_some());
    }

    #[tokio::test]
    async fn test_remove_clears_selection() {
        let registry = DeviceRegistry::demo();
        registry.select_device("2").await;
        assert!(registry.remove_device("2").await);
        assert!(registry.selected_device_id().await.is_none());
        assert!(!registry.remove_device("2").await);
    }
}
