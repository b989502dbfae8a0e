use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::oss::{OssClient, OssError};

/// 对象存在性探测失败时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorPolicy {
    /// 记录日志后按"不存在"继续上传
    #[default]
    TreatAsAbsent,
    /// 直接返回探测错误
    Propagate,
}

/// 上传结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// 对象已存在，未上传
    AlreadyExists,
}

/// 上传模板
///
/// 在任意 `OssClient` 之上实现"确保存储桶存在、跳过已存在对象、失败时清理"的上传流程。
/// 不做并发控制，同一个 key 的并发上传会相互竞争。
///
/// # 示例
/// ```ignore
/// let template = Template::new(ossx::oss::new_client("minio")?);
/// template.upload("a/b.txt", Path::new("/tmp/hello.txt")).await?;
/// ```
pub struct Template {
    client: Box<dyn OssClient>,
    probe_error_policy: ProbeErrorPolicy,
}

impl Template {
    pub fn new(client: Box<dyn OssClient>) -> Self {
        Self {
            client,
            probe_error_policy: ProbeErrorPolicy::default(),
        }
    }

    pub fn with_probe_error_policy(mut self, policy: ProbeErrorPolicy) -> Self {
        self.probe_error_policy = policy;
        self
    }

    pub fn client(&self) -> &dyn OssClient {
        self.client.as_ref()
    }

    /// 上传本地文件
    ///
    /// 1. 存储桶不存在时先创建
    /// 2. 对象已存在时直接返回 `AlreadyExists`
    /// 3. 上传失败时删除一次同名对象，删除失败只记录日志，返回上传错误
    pub async fn upload(&self, object_name: &str, file_path: &Path) -> Result<UploadOutcome, OssError> {
        if !self.client.bucket_exist().await? {
            self.client.new_bucket().await?;
            log::info!("bucket created before uploading {}", object_name);
        }

        let exists = match self.client.object_exist(object_name).await {
            Ok(exists) => exists,
            Err(e) if self.probe_error_policy == ProbeErrorPolicy::TreatAsAbsent => {
                log::warn!("object probe failed, treat as absent: {}, {}", object_name, e);
                false
            }
            Err(e) => return Err(e),
        };
        if exists {
            log::info!("object already exists, skip upload: {}", object_name);
            return Ok(UploadOutcome::AlreadyExists);
        }

        match self.client.put_object(object_name, file_path).await {
            Ok(()) => {
                log::info!("upload succeeded: {}", object_name);
                Ok(UploadOutcome::Uploaded)
            }
            Err(put_err) => {
                log::error!("upload failed: {}, {}", object_name, put_err);
                if let Err(e) = self.client.remove_object(object_name).await {
                    log::error!("cleanup after failed upload failed: {}, {}", object_name, e);
                }
                Err(put_err)
            }
        }
    }
}
