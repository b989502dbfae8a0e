use std::time::Duration;
use thiserror::Error;

/// 对象存储统一错误类型
///
/// 不对各厂商的错误做统一分类：网络、鉴权、冲突等错误以 `Http` / `Provider`
/// 的形式原样透传，只有"对象不存在"在下载时被识别为 `NotFound`
#[derive(Error, Debug)]
pub enum OssError {
    #[error("对象不存在: {key}")]
    NotFound { key: String },

    #[error("未知的存储厂商: {0}")]
    UnknownProvider(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("请求超时 [{provider}] {operation}: {timeout:?}")]
    Timeout {
        provider: String,
        operation: String,
        timeout: Duration,
    },

    #[error("厂商错误 [{provider}] {operation}: HTTP {status}: {message}")]
    Http {
        provider: String,
        operation: String,
        status: u16,
        message: String,
    },

    #[error("厂商错误 [{provider}]: {message}")]
    Provider {
        provider: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("响应解析失败 [{provider}]: {message}")]
    Decode { provider: String, message: String },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl OssError {
    /// 从厂商 SDK 错误转换
    pub fn from_provider<E>(err: E, provider: &str, context: &str) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        OssError::Provider {
            provider: provider.to_string(),
            message: context.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// 由非 2xx 的 HTTP 响应构造错误，响应体作为错误信息
    pub async fn from_response(provider: &str, operation: &str, resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        OssError::Http {
            provider: provider.to_string(),
            operation: operation.to_string(),
            status,
            message,
        }
    }

    pub fn decode(provider: &str, err: impl std::fmt::Display) -> Self {
        OssError::Decode {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }

    /// 是否为"对象/存储桶不存在"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OssError::NotFound { .. } | OssError::Http { status: 404, .. }
        )
    }
}
