use std::collections::BTreeMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};

use crate::error::{OrganizeError, OrganizeResult};
use crate::models::{ChatMessage, ProviderKind, RequestDescriptor, ResponseShape, Settings};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const CONTENT_TYPE_JSON: &str = "application/json";

static THINK_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<think>.*?</think>").expect("think block pattern is valid")
});

/**
 * \brief 已解析的 Provider，每个变体只携带自身需要的字段。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    OpenAi { api_key: String, model: String },
    OpenRouter { api_key: String, model: String },
    Ollama { base_url: String, model: String },
    /** \brief 自定义端点不注入 model，由服务端使用其默认模型。 */
    Custom { base_url: String },
}

impl Provider {
    /**
     * \brief 从配置构造 Provider；未知标识返回 UnsupportedProvider。
     */
    pub fn from_settings(settings: &Settings) -> OrganizeResult<Self> {
        let kind: ProviderKind = settings.provider.parse()?;
        Ok(match kind {
            ProviderKind::OpenAi => Provider::OpenAi {
                api_key: settings.api_key.clone(),
                model: settings.model.clone(),
            },
            ProviderKind::OpenRouter => Provider::OpenRouter {
                api_key: settings.api_key.clone(),
                model: settings.model.clone(),
            },
            ProviderKind::Ollama => Provider::Ollama {
                base_url: settings.ollama_url.clone(),
                model: settings.model.clone(),
            },
            ProviderKind::Custom => Provider::Custom {
                base_url: settings.custom_url.clone(),
            },
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::OpenAi { .. } => ProviderKind::OpenAi,
            Provider::OpenRouter { .. } => ProviderKind::OpenRouter,
            Provider::Ollama { .. } => ProviderKind::Ollama,
            Provider::Custom { .. } => ProviderKind::Custom,
        }
    }

    /**
     * \brief 生成请求描述：URL、请求头与请求体。
     */
    pub fn request(&self, messages: &[ChatMessage]) -> RequestDescriptor {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string());

        match self {
            Provider::OpenAi { api_key, model } => {
                headers.insert("Authorization".to_string(), format!("Bearer {}", api_key));
                RequestDescriptor {
                    url: OPENAI_CHAT_URL.to_string(),
                    headers,
                    body: json!({
                        "model": model,
                        "messages": messages,
                        "temperature": 1
                    }),
                    shape: ResponseShape::ChatCompletions,
                }
            }
            Provider::OpenRouter { api_key, model } => {
                headers.insert("Authorization".to_string(), format!("Bearer {}", api_key));
                RequestDescriptor {
                    url: OPENROUTER_CHAT_URL.to_string(),
                    headers,
                    body: json!({
                        "model": model,
                        "messages": messages
                    }),
                    shape: ResponseShape::ChatCompletions,
                }
            }
            Provider::Ollama { base_url, model } => RequestDescriptor {
                url: format!("{}/api/chat", base_url.trim_end_matches('/')),
                headers,
                body: json!({
                    "model": model,
                    "messages": messages,
                    "stream": false
                }),
                shape: ResponseShape::OllamaChat,
            },
            Provider::Custom { base_url } => RequestDescriptor {
                url: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
                headers,
                body: json!({ "messages": messages }),
                shape: ResponseShape::ChatCompletions,
            },
        }
    }
}

/**
 * \brief 根据配置与消息生成请求描述。
 */
pub fn resolve_request(
    settings: &Settings,
    messages: &[ChatMessage],
) -> OrganizeResult<RequestDescriptor> {
    Ok(Provider::from_settings(settings)?.request(messages))
}

/**
 * \brief HTTP 传输抽象，返回原始响应体文本（不检查状态码）。
 */
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> OrganizeResult<String>;
}

/**
 * \brief 基于 reqwest 的默认传输实现；超时沿用客户端默认值。
 */
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> OrganizeResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| OrganizeError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> OrganizeResult<String> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| OrganizeError::Transport(format!("invalid header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| OrganizeError::Transport(format!("invalid header value: {}", e)))?;
            header_map.insert(name, value);
        }

        let resp = self
            .client
            .post(url)
            .headers(header_map)
            .json(body)
            .send()
            .await
            .map_err(|e| OrganizeError::Transport(e.to_string()))?;

        resp.text()
            .await
            .map_err(|e| OrganizeError::Transport(e.to_string()))
    }
}

/**
 * \brief 执行一次请求并返回清理后的回复文本；不重试、不流式。
 */
pub async fn execute<T: Transport + ?Sized>(
    transport: &T,
    descriptor: &RequestDescriptor,
) -> OrganizeResult<String> {
    let raw = transport
        .post_json(&descriptor.url, &descriptor.headers, &descriptor.body)
        .await?;
    let v: Value = serde_json::from_str(&raw)
        .map_err(|e| OrganizeError::MalformedResponse(format!("invalid JSON: {}", e)))?;
    let reply = extract_reply(&v, descriptor.shape)?;
    Ok(strip_reasoning(&reply))
}

/**
 * \brief 解析响应信封：先检查 error，再按 shape 读取回复。
 */
pub fn extract_reply(v: &Value, shape: ResponseShape) -> OrganizeResult<String> {
    if !v.is_object() {
        return Err(OrganizeError::MalformedResponse(format!(
            "expected a JSON object, got: {}",
            v
        )));
    }

    if let Some(err) = v.get("error").filter(|e| is_error_envelope(e)) {
        return Err(OrganizeError::UpstreamApi(upstream_message(err)));
    }

    let content = match shape {
        ResponseShape::ChatCompletions => v
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content")),
        ResponseShape::OllamaChat => v.get("message").and_then(|m| m.get("content")),
    };

    match content.and_then(|c| c.as_str()) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(OrganizeError::EmptyResponse),
    }
}

/** \brief 仅对象或非空字符串视为错误；false、0、"" 等值忽略。 */
fn is_error_envelope(err: &Value) -> bool {
    match err {
        Value::Object(_) => true,
        Value::String(text) => !text.is_empty(),
        _ => false,
    }
}

fn upstream_message(err: &Value) -> String {
    if let Some(message) = err.get("message").and_then(|m| m.as_str()) {
        return message.to_string();
    }
    match err.as_str() {
        Some(text) => text.to_string(),
        None => err.to_string(),
    }
}

/**
 * \brief 移除所有 `<think>...</think>` 块（忽略大小写，可跨行）并去除首尾空白。
 *
 * 删除一个块可能拼接出新的块，因此重复替换直到文本不再变化。
 */
pub fn strip_reasoning(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = THINK_BLOCK.replace_all(&current, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current.trim().to_string()
}
