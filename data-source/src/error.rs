//! 数据源层统一错误定义
//!
//! 覆盖拉取/传输、订阅复用与 URI 解析等最小必要集合，
//! 便于提供者实现统一转换为 `DataSourceError`，并据 `status()` 做退避分类。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DataSourceError {
    // --- 拉取/传输 ---
    #[error("http error: status={status}, reason={reason}")]
    Http { status: u16, reason: String },
    #[error("request aborted: {reason}")]
    Aborted { reason: String },
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 订阅/复用 ---
    #[error("invalid uri: {reason}")]
    InvalidUri { reason: String },
    #[error("provider not found: scheme={scheme}")]
    ProviderNotFound { scheme: String },
    #[error("data source service is shut down")]
    ServiceShutdown,

    // --- 通用 ---
    #[error("source error: {reason}")]
    Source { reason: String },
}

impl DataSourceError {
    pub fn http(status: u16, reason: impl Into<String>) -> Self {
        Self::Http {
            status,
            reason: reason.into(),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    pub fn source(reason: impl Into<String>) -> Self {
        Self::Source {
            reason: reason.into(),
        }
    }

    /// 类 HTTP 状态码字符串；传输中断/超时视作 `"0"`，其余无状态的错误返回 `None`
    pub fn status(&self) -> Option<String> {
        match self {
            Self::Http { status, .. } => Some(status.to_string()),
            Self::Aborted { .. } => Some("0".to_string()),
            _ => None,
        }
    }
}

/// 统一 Result 类型别名
pub type DataSourceResult<T> = Result<T, DataSourceError>;

#[cfg(feature = "consul-http")]
impl From<reqwest::Error> for DataSourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return DataSourceError::http(status.as_u16(), err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return DataSourceError::aborted(err.to_string());
        }
        if err.is_decode() {
            return DataSourceError::InvalidResponse {
                reason: err.to_string(),
            };
        }
        DataSourceError::source(err.to_string())
    }
}
