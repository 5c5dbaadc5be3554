//! 对话上下文
//!
//! AI 解析的短期记忆：user/assistant 成对写入，超过 20 条丢最旧，
//! 每次新请求只回放最近 5 条作为上下文。

use serde::{Deserialize, Serialize};

/// 消息角色（序列化形式与补全 API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 单条对话消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 有界对话历史
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    turns: Vec<ChatTurn>,
    max_entries: usize,
}

impl ConversationHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_entries,
        }
    }

    /// 记录一次成功的问答（失败的交互不写入）
    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(ChatTurn::user(user));
        self.turns.push(ChatTurn::assistant(assistant));
        self.prune();
    }

    /// 最近 n 条消息（不足 n 时返回全部）
    pub fn recent(&self, n: usize) -> &[ChatTurn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// 超出上限时丢弃最旧的消息
    fn prune(&mut self) {
        if self.turns.len() > self.max_entries {
            let keep = self.max_entries;
            self.turns.drain(..self.turns.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
