//! 指令解析模块
//!
//! 将模型回复按行解析为结构化设备动作，动作按固定顺序匹配，无法识别的行直接跳过

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 滚动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// 设备动作（闭集，新增动作需同步更新系统提示词）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceAction {
    /// 截取当前屏幕
    Screenshot,
    /// 点击坐标
    Tap { x: i64, y: i64 },
    /// 两点间滑动，时长毫秒
    Swipe {
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        duration: i64,
    },
    /// 输入文本
    Input { text: String },
    /// 返回上一界面
    Back,
    /// 返回主屏幕
    Home,
    /// 打开应用
    Launch { app: String },
    /// 滚动屏幕
    Scroll { direction: ScrollDirection },
}

impl DeviceAction {
    /// 动作动词，与下发设备的指令文本保持一致
    pub fn name(&self) -> &'static str {
        match self {
            DeviceAction::Screenshot => "screenshot",
            DeviceAction::Tap { .. } => "tap",
            DeviceAction::Swipe { .. } => "swipe",
            DeviceAction::Input { .. } => "input",
            DeviceAction::Back => "back",
            DeviceAction::Home => "home",
            DeviceAction::Launch { .. } => "launch",
            DeviceAction::Scroll { .. } => "scroll",
        }
    }

    /// 参数对象（无参数动作返回空对象）
    pub fn params(&self) -> Value {
        match self {
            DeviceAction::Screenshot | DeviceAction::Back | DeviceAction::Home => json!({}),
            DeviceAction::Tap { x, y } => json!({ "x": x, "y": y }),
            DeviceAction::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration,
            } => json!({ "x1": x1, "y1": y1, "x2": x2, "y2": y2, "duration": duration }),
            DeviceAction::Input { text } => json!({ "text": text }),
            DeviceAction::Launch { app } => json!({ "app": app }),
            DeviceAction::Scroll { direction } => json!({ "direction": direction }),
        }
    }
}

/// 单条解析结果：结构化动作加中文描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub action: DeviceAction,
    /// 用于执行记录与日志展示的描述文本
    pub description: String,
}

impl ParsedCommand {
    /// 送入命令执行器的文本形式：`动作 参数JSON`
    pub fn command_string(&self) -> String {
        format!("{} {}", self.action.name(), self.action.params())
    }
}

static TAP_RE: OnceLock<Regex> = OnceLock::new();
static SWIPE_RE: OnceLock<Regex> = OnceLock::new();

fn tap_re() -> &'static Regex {
    TAP_RE.get_or_init(|| Regex::new(r"点击\s+([0-9]+)\s+([0-9]+)").unwrap())
}

fn swipe_re() -> &'static Regex {
    SWIPE_RE.get_or_init(|| {
        Regex::new(r"滑动\s+([0-9]+)\s+([0-9]+)\s+([0-9]+)\s+([0-9]+)(?:\s+([0-9]+))?").unwrap()
    })
}

/// 将模型回复解析为指令序列
///
/// 逐行扫描，空行与无法识别的行静默跳过，返回顺序与回复中出现顺序一致
pub fn parse_commands(reply: &str) -> Vec<ParsedCommand> {
    reply
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_line)
        .collect()
}

/// 解析单行指令，规则按声明顺序匹配，首个命中生效
fn parse_line(trimmed: &str) -> Option<ParsedCommand> {
    if trimmed.starts_with("截图") {
        return Some(ParsedCommand {
            action: DeviceAction::Screenshot,
            description: "截取屏幕".to_string(),
        });
    }

    if trimmed.starts_with("点击") {
        let caps = tap_re().captures(trimmed)?;
        return Some(ParsedCommand {
            action: DeviceAction::Tap {
                x: caps[1].parse().ok()?,
                y: caps[2].parse().ok()?,
            },
            // 描述保留模型原文的数字串，不做归一化
            description: format!("点击坐标({}, {})", &caps[1], &caps[2]),
        });
    }

    if trimmed.starts_with("滑动") {
        let caps = swipe_re().captures(trimmed)?;
        let duration = match caps.get(5) {
            Some(m) => m.as_str().parse().ok()?,
            None => 300,
        };
        return Some(ParsedCommand {
            action: DeviceAction::Swipe {
                x1: caps[1].parse().ok()?,
                y1: caps[2].parse().ok()?,
                x2: caps[3].parse().ok()?,
                y2: caps[4].parse().ok()?,
                duration,
            },
            description: format!(
                "滑动从({}, {})到({}, {})",
                &caps[1], &caps[2], &caps[3], &caps[4]
            ),
        });
    }

    if trimmed.starts_with("输入") {
        let text = trimmed.strip_prefix("输入").unwrap_or(trimmed).trim_start();
        return Some(ParsedCommand {
            action: DeviceAction::Input {
                text: text.to_string(),
            },
            description: format!("输入文本: {}", text),
        });
    }

    if trimmed == "返回" || trimmed == "back" {
        return Some(ParsedCommand {
            action: DeviceAction::Back,
            description: "返回上一界面".to_string(),
        });
    }

    if trimmed == "Home" || trimmed == "home" || trimmed == "主页" {
        return Some(ParsedCommand {
            action: DeviceAction::Home,
            description: "返回主屏幕".to_string(),
        });
    }

    if trimmed.starts_with("打开") {
        let app = trimmed.strip_prefix("打开").unwrap_or(trimmed).trim_start();
        return Some(ParsedCommand {
            action: DeviceAction::Launch {
                app: app.to_string(),
            },
            description: format!("打开应用: {}", app),
        });
    }

    if trimmed.starts_with("滚动") {
        let direction = if trimmed.contains('上') {
            ScrollDirection::Up
        } else {
            ScrollDirection::Down
        };
        let suffix = match direction {
            ScrollDirection::Up => "向上",
            ScrollDirection::Down => "向下",
        };
        return Some(ParsedCommand {
            action: DeviceAction::Scroll { direction },
            description: format!("滚动屏幕{}", suffix),
        });
    }

    None
}
