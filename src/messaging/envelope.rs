//! 消息信封定义
//!
//! 与设备控制服务端约定的 WebSocket 消息格式，出站与入站分开建模

use serde::{Deserialize, Serialize};

use crate::device::DeviceStatus;

/// 出站消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// 心跳
    Ping,

    /// 设备控制命令
    Command {
        #[serde(rename = "deviceId")]
        device_id: String,
        command: String,
        /// 毫秒时间戳
        timestamp: i64,
    },
}

impl Outbound {
    pub fn command(device_id: &str, command: &str) -> Self {
        Outbound::Command {
            device_id: device_id.to_string(),
            command: command.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 序列化为文本帧
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 入站消息
///
/// 服务端可能发来这里没有建模的 type，由链路层按未知消息记录，
/// 所以字段缺失一律容忍而不是报错
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// 设备状态变更
    DeviceStatus {
        #[serde(rename = "deviceId")]
        device_id: String,
        status: DeviceStatus,
    },

    /// 设备上报的数据
    DeviceData {
        #[serde(rename = "deviceId", default)]
        device_id: Option<String>,
        #[serde(default)]
        data: serde_json::Value,
    },

    /// 命令执行结果
    CommandResult {
        #[serde(rename = "deviceId", default)]
        device_id: Option<String>,
        #[serde(default)]
        result: String,
        #[serde(default)]
        details: Option<String>,
    },

    /// 服务端错误
    Error {
        #[serde(default)]
        message: String,
        #[serde(default)]
        details: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_frame() {
        assert_eq!(Outbound::Ping.to_frame(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_command_frame_uses_camel_case_device_id() {
        let frame = Outbound::command("device_1", r#"tap {"x":100,"y":200}"#).to_frame();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["deviceId"], "device_1");
        assert_eq!(value["command"], r#"tap {"x":100,"y":200}"#);
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_parse_device_status() {
        let inbound: Inbound =
            serde_json::from_str(r#"{"type":"device_status","deviceId":"3","status":"online"}"#)
                .unwrap();
        assert_eq!(
            inbound,
            Inbound::DeviceStatus {
                device_id: "3".to_string(),
                status: DeviceStatus::Online,
            }
        );
    }

    #[test]
    fn test_parse_command_result_tolerates_missing_fields() {
        let inbound: Inbound =
            serde_json::from_str(r#"{"type":"command_result","result":"ok"}"#).unwrap();
        match inbound {
            Inbound::CommandResult {
                device_id,
                result,
                details,
            } => {
                assert!(device_id.is_none());
                assert_eq!(result, "ok");
                assert!(details.is_none());
            }
            other => panic!("解析出了错误的变体: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<Inbound>(r#"{"type":"shutdown_notice"}"#).is_err());
    }
}
