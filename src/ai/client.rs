//! 对话模型客户端
//!
//! 通过 reqwest 调用 OpenAI 兼容的 chat/completions 端点（智谱 GLM、自建代理等），
//! 另提供 Mock 实现用于离线演示与测试。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ai::history::{ChatTurn, Role};
use crate::config::AiSection;

/// 调用失败
#[derive(Debug, Error)]
pub enum ChatError {
    /// 服务端拒绝请求，message 优先取响应体里的 error.message
    #[error("{message}")]
    Api { status: u16, message: String },
    /// 网络层错误（连不上、超时等）
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// 单次调用的采样与超时参数
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ChatOptions {
    /// 指令解析档位
    pub fn parsing() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: 1024,
            timeout: Duration::from_secs(30),
        }
    }

    /// 连通性探测档位（短回复、短超时、不设温度）
    pub fn probe() -> Self {
        Self {
            temperature: None,
            max_tokens: 10,
            timeout: Duration::from_secs(10),
        }
    }
}

/// 对话模型客户端 trait
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// 非流式完成，返回首条回复的文本内容
    async fn complete(&self, turns: &[ChatTurn], options: ChatOptions)
        -> Result<String, ChatError>;

    /// 密钥等凭证是否就绪
    fn is_configured(&self) -> bool {
        true
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<UsageStats>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageStats {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// HTTP 客户端：持有端点、密钥与 model 名，complete 时取首条 choice 的 content
pub struct HttpChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    configured: bool,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl HttpChatClient {
    pub fn new(cfg: &AiSection) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            configured: cfg.is_valid_api_key(),
            usage: TokenUsage::new(),
        }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(
        &self,
        turns: &[ChatTurn],
        options: ChatOptions,
    ) -> Result<String, ChatError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: turns,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
            let message = body
                .error
                .and_then(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("请求失败，状态码 {}", status.as_u16()));
            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // 2xx 但结构不符时按空回复处理，交给上层按零命令告警
        let text = resp.text().await.unwrap_or_default();
        let body: ChatCompletionResponse = serde_json::from_str(&text).unwrap_or_default();

        if let Some(usage) = &body.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        Ok(content)
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

/// Mock 客户端：回显用户最后一条消息，便于离线跑通解析与执行链路
#[derive(Debug, Default)]
pub struct MockChatClient;

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(
        &self,
        turns: &[ChatTurn],
        _options: ChatOptions,
    ) -> Result<String, ChatError> {
        let last_user = turns
            .iter()
            .rev()
            .find(|t| matches!(t.role, Role::User))
            .map(|t| t.content.as_str())
            .unwrap_or_default();

        Ok(last_user.to_string())
    }
}
