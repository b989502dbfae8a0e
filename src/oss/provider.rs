use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::oss::OssError;

/// 内置的存储厂商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aliyun,
    Baidu,
    Huawei,
    Minio,
    Qiniu,
    Tencent,
    Upyun,
    S3,
}

impl Provider {
    pub const ALL: [Provider; 8] = [
        Provider::Aliyun,
        Provider::Baidu,
        Provider::Huawei,
        Provider::Minio,
        Provider::Qiniu,
        Provider::Tencent,
        Provider::Upyun,
        Provider::S3,
    ];

    /// 注册表中使用的类型名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aliyun => "aliyun",
            Provider::Baidu => "baidu",
            Provider::Huawei => "huawei",
            Provider::Minio => "minio",
            Provider::Qiniu => "qiniu",
            Provider::Tencent => "tencent",
            Provider::Upyun => "upyun",
            Provider::S3 => "s3",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = OssError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| OssError::UnknownProvider(s.to_string()))
    }
}
