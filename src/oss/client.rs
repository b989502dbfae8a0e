use async_trait::async_trait;
use std::path::Path;

use crate::oss::{ObjectInfo, OssError};

/// 对象存储客户端统一接口
///
/// 每个厂商适配器都必须以相同的外部语义实现全部操作：
///
/// - 存在性判断只做元数据调用，不下载内容；可识别的"不存在"返回 `Ok(false)`，
///   其余失败返回错误
/// - `object_name` 是桶内完整的逻辑路径（如 `exampledir/exampleobject.txt`）
/// - `file_path` 是本地文件的完整路径，下载时不会自动创建父目录
/// - `list_objects` 内部循环分页，直到取完为止，一次性返回全部结果
#[async_trait]
pub trait OssClient: Send + Sync {
    /// 判断存储桶是否存在
    async fn bucket_exist(&self) -> Result<bool, OssError>;

    /// 创建存储桶
    async fn new_bucket(&self) -> Result<(), OssError>;

    /// 删除存储桶（非空时由厂商决定是否报错）
    async fn remove_bucket(&self) -> Result<(), OssError>;

    /// 上传本地文件，已存在则覆盖
    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError>;

    /// 下载对象到本地文件，对象不存在时返回 `OssError::NotFound`
    async fn get_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError>;

    /// 列出 `prefix` 下、`start_after` 之后的全部对象
    async fn list_objects(
        &self,
        prefix: &str,
        start_after: &str,
    ) -> Result<Vec<ObjectInfo>, OssError>;

    /// 删除单个对象
    async fn remove_object(&self, object_name: &str) -> Result<(), OssError>;

    /// 判断对象是否存在
    async fn object_exist(&self, object_name: &str) -> Result<bool, OssError>;
}
