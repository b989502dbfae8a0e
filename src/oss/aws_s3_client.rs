// API 文档参考：
// aws-sdk-s3 文档: https://docs.rs/aws-sdk-s3/latest/aws_sdk_s3/
// ListObjectsV2: https://docs.aws.amazon.com/AmazonS3/latest/API/API_ListObjectsV2.html

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use garde::Validate;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::path::Path;
use std::time::Duration;

use crate::cfg::serde_duration::{serde_as, HumanDur};
use crate::oss::common;
use crate::oss::{ObjectInfo, OssClient, OssError};

const PROVIDER: &str = "S3";

/// S3 客户端配置，也适用于任意兼容 S3 协议的服务
///
/// 凭证获取顺序：
/// 1. `access_key_id` + `secret_access_key`
/// 2. 环境变量 `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
#[serde_as]
#[derive(Debug, Deserialize, Serialize, SmartDefault, Clone, Validate)]
#[serde(default)]
pub struct AwsS3ClientConfig {
    #[garde(pattern(r"^[a-zA-Z0-9._\-]*$"))]
    pub bucket: String,

    #[garde(skip)]
    #[default = "us-east-1"]
    pub region: String,

    /// 自定义端点（用于兼容 S3 的存储）
    #[garde(skip)]
    pub endpoint: Option<String>,

    /// 是否使用 path-style URL，设置了 endpoint 时默认为 true
    #[garde(skip)]
    pub force_path_style: Option<bool>,

    #[garde(skip)]
    pub access_key_id: Option<String>,

    #[garde(skip)]
    pub secret_access_key: Option<String>,

    /// 单次操作超时（包含 SDK 内部重试）
    #[garde(skip)]
    #[serde_as(as = "HumanDur")]
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,
}

/// S3 实现
pub struct AwsS3Client {
    client: Client,
    config: AwsS3ClientConfig,
}

impl AwsS3Client {
    /// 同步构造，不访问网络
    pub fn new(config: AwsS3ClientConfig) -> Result<Self, OssError> {
        common::validate(&config)?;

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.timeout)
                    .build(),
            );

        builder = match (&config.access_key_id, &config.secret_access_key) {
            (Some(ak), Some(sk)) => {
                builder.credentials_provider(Credentials::new(ak, sk, None, None, "ossx"))
            }
            _ => builder.credentials_provider(
                aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
            ),
        };

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .endpoint_url(endpoint)
                .force_path_style(config.force_path_style.unwrap_or(true));
        } else if let Some(path_style) = config.force_path_style {
            builder = builder.force_path_style(path_style);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    fn sdk_error<E, R>(&self, err: SdkError<E, R>, operation: &str) -> OssError
    where
        E: std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug + Send + Sync + 'static,
    {
        match err {
            SdkError::TimeoutError(_) => OssError::Timeout {
                provider: PROVIDER.to_string(),
                operation: operation.to_string(),
                timeout: self.config.timeout,
            },
            err => OssError::from_provider(err, PROVIDER, operation),
        }
    }
}

fn is_not_found<E>(err: &SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> bool {
    err.raw_response()
        .map(|resp| resp.status().as_u16() == 404)
        .unwrap_or(false)
}

#[async_trait]
impl OssClient for AwsS3Client {
    async fn bucket_exist(&self) -> Result<bool, OssError> {
        match self
            .client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(self.sdk_error(e, "bucket_exist")),
        }
    }

    // us-east-1 不接受 LocationConstraint
    async fn new_bucket(&self) -> Result<(), OssError> {
        let mut request = self.client.create_bucket().bucket(&self.config.bucket);
        if self.config.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(
                        self.config.region.as_str(),
                    ))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "new_bucket"))?;
        Ok(())
    }

    async fn remove_bucket(&self) -> Result<(), OssError> {
        self.client
            .delete_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "remove_bucket"))?;
        Ok(())
    }

    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let data = common::read_local_file(file_path).await?;
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(object_name)
            .content_type("application/octet-stream")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "put_object"))?;
        Ok(())
    }

    async fn get_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(object_name)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    OssError::NotFound {
                        key: object_name.to_string(),
                    }
                } else {
                    self.sdk_error(e, "get_object")
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| OssError::from_provider(e, PROVIDER, "get_object"))?
            .into_bytes();

        common::write_local_file(file_path, &data).await
    }

    async fn list_objects(
        &self,
        prefix: &str,
        start_after: &str,
    ) -> Result<Vec<ObjectInfo>, OssError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix);
            if !start_after.is_empty() {
                request = request.start_after(start_after);
            }
            if let Some(t) = &token {
                request = request.continuation_token(t);
            }

            let output = request
                .send()
                .await
                .map_err(|e| self.sdk_error(e, "list_objects"))?;

            objects.extend(output.contents().iter().map(|obj| ObjectInfo {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or_default(),
                etag: common::trim_etag(obj.e_tag().unwrap_or_default()),
                last_modified: obj
                    .last_modified()
                    .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_default(),
                storage_class: obj
                    .storage_class()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_default(),
            }));

            token = output
                .next_continuation_token()
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if !output.is_truncated().unwrap_or(false) || token.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    async fn remove_object(&self, object_name: &str) -> Result<(), OssError> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(object_name)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "remove_object"))?;
        Ok(())
    }

    async fn object_exist(&self, object_name: &str) -> Result<bool, OssError> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(object_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(self.sdk_error(e, "object_exist")),
        }
    }
}

impl TryFrom<AwsS3ClientConfig> for AwsS3Client {
    type Error = OssError;

    fn try_from(config: AwsS3ClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Box<AwsS3Client>> for Box<dyn OssClient> {
    fn from(client: Box<AwsS3Client>) -> Self {
        client as Box<dyn OssClient>
    }
}
