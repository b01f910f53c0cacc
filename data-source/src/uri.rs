//! 数据源 URI（SourceUri）
//!
//! 形如 `consul://dc-1/services`、`settings://token` 的逻辑地址；
//! 未携带 `scheme://` 的地址默认归入 `consul` 提供者。
//!
use crate::error::{DataSourceError, DataSourceResult};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceUri {
    scheme: String,
    path: String,
}

impl SourceUri {
    pub const DEFAULT_SCHEME: &'static str = "consul";

    pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> DataSourceResult<Self> {
        let scheme = scheme.into();
        let path = path.into();

        let valid_scheme = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(DataSourceError::InvalidUri {
                reason: format!("invalid scheme: {scheme:?}"),
            });
        }
        if path.is_empty() {
            return Err(DataSourceError::InvalidUri {
                reason: format!("empty path for scheme {scheme}"),
            });
        }

        Ok(Self { scheme, path })
    }

    pub fn parse(raw: &str) -> DataSourceResult<Self> {
        let raw = raw.trim();
        match raw.split_once("://") {
            Some((scheme, path)) => Self::new(scheme, path),
            None => Self::new(Self::DEFAULT_SCHEME, raw.trim_start_matches('/')),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for SourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path)
    }
}

impl FromStr for SourceUri {
    type Err = DataSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
