use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrganizeError;

pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_TARGET_LANGUAGE: &str = "es";

/**
 * \brief 插件配置；启动时加载一次，核心流程只读。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /** \brief Provider 标识：openai / openrouter / ollama / custom */
    pub provider: String,
    /** \brief API Key（仅 openai / openrouter 使用） */
    pub api_key: String,
    /** \brief 模型名 */
    pub model: String,
    /** \brief 自定义端点基地址 */
    pub custom_url: String,
    /** \brief 本地 Ollama 基地址 */
    pub ollama_url: String,
    /** \brief 输出语言代码，如 "es" */
    pub target_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            custom_url: String::new(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            target_language: DEFAULT_TARGET_LANGUAGE.to_string(),
        }
    }
}

impl Settings {
    /**
     * \brief 返回隐藏密钥后的副本，用于展示与日志。
     */
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        copy.api_key = mask_secret(&self.api_key);
        copy
    }
}

fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        return String::new();
    }
    if count <= 8 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

/**
 * \brief Provider 类型（封闭集合）。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    Ollama,
    Custom,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::OpenRouter,
        ProviderKind::Ollama,
        ProviderKind::Custom,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = OrganizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "ollama" => Ok(ProviderKind::Ollama),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(OrganizeError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /** \brief 角色：system/user/assistant */
    pub role: Role,
    /** \brief 内容 */
    pub content: String,
}

impl ChatMessage {
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
}

/**
 * \brief 回复文本所在的 JSON 路径。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /** \brief `choices[0].message.content`（OpenAI 兼容） */
    ChatCompletions,
    /** \brief `message.content`（Ollama） */
    OllamaChat,
}

/**
 * \brief 单次调用的请求描述，每次运行重新构造。
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub shape: ResponseShape,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parses_known_ids() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.id().parse::<ProviderKind>().expect("parse"), kind);
        }
    }

    #[test]
    fn test_provider_kind_is_case_sensitive() {
        let err = "OpenAI".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, OrganizeError::UnsupportedProvider(ref id) if id == "OpenAI"));
    }

    #[test]
    fn test_settings_missing_fields_fall_back_to_defaults() {
        let parsed: Settings =
            serde_json::from_str(r#"{"provider":"ollama","model":"llama3"}"#).expect("parse");
        assert_eq!(parsed.provider, "ollama");
        assert_eq!(parsed.model, "llama3");
        assert_eq!(parsed.ollama_url, DEFAULT_OLLAMA_URL);
        assert_eq!(parsed.target_language, DEFAULT_TARGET_LANGUAGE);
    }

    #[test]
    fn test_masked_keeps_only_tail() {
        let settings = Settings {
            api_key: "sk-abcdefghijkl".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.masked().api_key, "***********ijkl");

        let short = Settings {
            api_key: "sk-1".to_string(),
            ..Settings::default()
        };
        assert_eq!(short.masked().api_key, "****");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::system("hi");
        let v = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(v, serde_json::json!({"role": "system", "content": "hi"}));
    }
}
