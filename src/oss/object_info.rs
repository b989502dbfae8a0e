use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 与厂商无关的对象描述，由 `list_objects` 返回
///
/// 厂商没有返回的字段保持默认值：字符串为空，时间为 Unix 纪元
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub storage_class: String,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            size,
            ..Default::default()
        }
    }
}
