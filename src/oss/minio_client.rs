use async_trait::async_trait;
use garde::Validate;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::path::Path;
use std::time::Duration;

use crate::cfg::serde_duration::{serde_as, HumanDur};
use crate::oss::common;
use crate::oss::{AwsS3Client, AwsS3ClientConfig, ObjectInfo, OssClient, OssError};

/// MinIO 配置
#[serde_as]
#[derive(Debug, Deserialize, Serialize, SmartDefault, Clone, Validate)]
#[serde(default)]
pub struct MinioClientConfig {
    /// 服务地址，例如 `127.0.0.1:9000`
    #[garde(skip)]
    #[default = "127.0.0.1:9000"]
    pub endpoint: String,

    #[garde(skip)]
    pub access_key_id: String,

    #[garde(skip)]
    pub access_key_secret: String,

    #[garde(pattern(r"^[a-zA-Z0-9._\-]*$"))]
    pub bucket: String,

    #[garde(skip)]
    pub use_ssl: bool,

    /// 创建存储桶时使用的区域
    #[garde(skip)]
    #[default = "us-east-1"]
    pub region: String,

    #[garde(skip)]
    #[serde_as(as = "HumanDur")]
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,
}

/// MinIO 实现，基于 S3 协议，使用 path-style 地址
pub struct MinioClient(AwsS3Client);

impl MinioClient {
    pub fn new(config: MinioClientConfig) -> Result<Self, OssError> {
        common::validate(&config)?;

        let s3 = AwsS3Client::new(AwsS3ClientConfig {
            bucket: config.bucket,
            region: config.region,
            endpoint: Some(common::endpoint_url(&config.endpoint, config.use_ssl)),
            force_path_style: Some(true),
            access_key_id: Some(config.access_key_id),
            secret_access_key: Some(config.access_key_secret),
            timeout: config.timeout,
        })?;

        Ok(Self(s3))
    }
}

#[async_trait]
impl OssClient for MinioClient {
    async fn bucket_exist(&self) -> Result<bool, OssError> {
        self.0.bucket_exist().await
    }

    async fn new_bucket(&self) -> Result<(), OssError> {
        self.0.new_bucket().await
    }

    async fn remove_bucket(&self) -> Result<(), OssError> {
        self.0.remove_bucket().await
    }

    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        self.0.put_object(object_name, file_path).await
    }

    async fn get_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        self.0.get_object(object_name, file_path).await
    }

    async fn list_objects(
        &self,
        prefix: &str,
        start_after: &str,
    ) -> Result<Vec<ObjectInfo>, OssError> {
        self.0.list_objects(prefix, start_after).await
    }

    async fn remove_object(&self, object_name: &str) -> Result<(), OssError> {
        self.0.remove_object(object_name).await
    }

    async fn object_exist(&self, object_name: &str) -> Result<bool, OssError> {
        self.0.object_exist(object_name).await
    }
}

impl TryFrom<MinioClientConfig> for MinioClient {
    type Error = OssError;

    fn try_from(config: MinioClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Box<MinioClient>> for Box<dyn OssClient> {
    fn from(client: Box<MinioClient>) -> Self {
        client as Box<dyn OssClient>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> MinioClient {
        MinioClient::new(MinioClientConfig {
            endpoint: server.url(),
            access_key_id: "minioadmin".to_string(),
            access_key_secret: "minioadmin".to_string(),
            bucket: "test-bucket".to_string(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config: MinioClientConfig = toml::from_str(
            r#"
endpoint = "play.min.io"
bucket = "test-bucket"
use_ssl = true
"#,
        )
        .unwrap();

        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert!(MinioClient::new(config).is_ok());
    }

    #[tokio::test]
    async fn test_object_exist_uses_path_style() {
        let mut server = mockito::Server::new_async().await;
        let found = server
            .mock("HEAD", "/test-bucket/a/b.txt")
            .match_query(Matcher::Any)
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("HEAD", "/test-bucket/missing.txt")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.object_exist("a/b.txt").await.unwrap());
        assert!(!client.object_exist("missing.txt").await.unwrap());
        found.assert_async().await;
    }

    #[tokio::test]
    async fn test_bucket_exist_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", Matcher::Regex(r"^/test-bucket/?$".to_string()))
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        assert!(!client_for(&server).bucket_exist().await.unwrap());
    }
}
