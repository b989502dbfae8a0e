// API 文档参考：
// aliyun-oss-rust-sdk 文档: https://docs.rs/aliyun-oss-rust-sdk/latest/aliyun_oss_rust_sdk/
// 阿里云 OSS API 参考: https://help.aliyun.com/zh/oss/developer-reference/list-of-operations-by-function

use aliyun_oss_rust_sdk::oss::OSS;
use aliyun_oss_rust_sdk::request::{RequestBuilder, RequestType};
use async_trait::async_trait;
use garde::Validate;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::path::Path;
use std::time::Duration;

use crate::cfg::serde_duration::{serde_as, HumanDur};
use crate::oss::common;
use crate::oss::{ObjectInfo, OssClient, OssError};

const PROVIDER: &str = "Aliyun OSS";

/// 阿里云 OSS 配置
#[serde_as]
#[derive(Debug, Deserialize, Serialize, SmartDefault, Clone, Validate)]
#[serde(default)]
pub struct AliyunOssClientConfig {
    /// 地域节点，例如 `oss-cn-hangzhou.aliyuncs.com`
    #[garde(skip)]
    #[default = "oss-cn-hangzhou.aliyuncs.com"]
    pub endpoint: String,

    #[garde(skip)]
    pub access_key_id: String,

    #[garde(skip)]
    pub access_key_secret: String,

    #[garde(pattern(r"^[a-zA-Z0-9._\-]*$"))]
    pub bucket: String,

    #[garde(skip)]
    #[default = true]
    pub use_ssl: bool,

    /// 存储桶访问地址，例如代理或兼容服务 `http://127.0.0.1:9000`，
    /// 为空时使用 `{scheme}://{bucket}.{endpoint}`
    #[garde(skip)]
    pub bucket_url: String,

    #[garde(skip)]
    #[serde_as(as = "HumanDur")]
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,
}

// ListObjectsV2 响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
    #[serde(default)]
    contents: Vec<OssObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OssObject {
    key: String,
    #[serde(default)]
    last_modified: String,
    #[serde(rename = "ETag", default)]
    etag: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    storage_class: String,
}

/// 阿里云 OSS 实现
///
/// 对象的上传、下载、删除和元信息走 SDK；SDK 未覆盖的存储桶操作和 ListObjectsV2
/// 由 SDK 生成签名头，再通过 reqwest 发送
pub struct AliyunOssClient {
    client: OSS,
    http: reqwest::Client,
    bucket_url: String,
    config: AliyunOssClientConfig,
}

impl AliyunOssClient {
    pub fn new(config: AliyunOssClientConfig) -> Result<Self, OssError> {
        common::validate(&config)?;

        let host = common::endpoint_host(&config.endpoint);
        let client = OSS::new(
            &config.access_key_id,
            &config.access_key_secret,
            &host,
            &config.bucket,
        );
        let http = common::http_client(PROVIDER, config.timeout)?;
        let bucket_url = if config.bucket_url.is_empty() {
            let scheme = if config.use_ssl { "https" } else { "http" };
            format!("{}://{}.{}", scheme, config.bucket, host)
        } else {
            config.bucket_url.trim_end_matches('/').to_string()
        };

        Ok(Self {
            client,
            http,
            bucket_url,
            config,
        })
    }

    // SDK 请求统一发往 bucket_url
    fn sdk_request(&self) -> RequestBuilder {
        RequestBuilder::new().with_cdn(&self.bucket_url)
    }

    // 用 SDK 为存储桶根路径生成 Authorization 与 Date 头，
    // subresources 参与签名并追加到查询串
    fn signed_request(
        &self,
        method: RequestType,
        query: &str,
        subresources: &[(&str, &str)],
    ) -> Result<reqwest::RequestBuilder, OssError> {
        let http_method = match method {
            RequestType::Put => reqwest::Method::PUT,
            RequestType::Delete => reqwest::Method::DELETE,
            RequestType::Post => reqwest::Method::POST,
            _ => reqwest::Method::GET,
        };

        let mut builder = self.sdk_request();
        builder.method = method;
        for (k, v) in subresources {
            builder.parameters.insert(k.to_string(), v.to_string());
        }
        let (_, headers) = self
            .client
            .build_request("/", builder)
            .map_err(|e| OssError::Configuration(format!("生成签名失败: {}", e)))?;

        let header = |name: &str| -> Result<String, OssError> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| OssError::Configuration(format!("签名结果缺少 {} 头", name)))
        };

        let query = subresources
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .chain((!query.is_empty()).then(|| query.to_string()))
            .collect::<Vec<_>>()
            .join("&");
        let url = if query.is_empty() {
            format!("{}/", self.bucket_url)
        } else {
            format!("{}/?{}", self.bucket_url, query)
        };

        Ok(self
            .http
            .request(http_method, url)
            .header("Authorization", header("Authorization")?)
            .header("Date", header("date")?))
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListBucketResult, OssError> {
        let mut params = vec![
            ("list-type", "2"),
            ("max-keys", "1000"),
            ("prefix", prefix),
        ];
        if !start_after.is_empty() {
            params.push(("start-after", start_after));
        }
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        // continuation-token 属于签名子资源
        let subresources: Vec<(&str, &str)> = continuation_token
            .map(|token| vec![("continuation-token", token)])
            .unwrap_or_default();
        let request = self.signed_request(RequestType::Get, &query, &subresources)?;
        let resp = common::send(PROVIDER, "list_objects", self.config.timeout, request).await?;
        let resp = common::ensure_success(PROVIDER, "list_objects", resp).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| OssError::from_provider(e, PROVIDER, "list_objects"))?;

        quick_xml::de::from_str(&text).map_err(|e| OssError::decode(PROVIDER, e))
    }
}

fn is_not_found(err: &impl std::fmt::Debug) -> bool {
    let msg = format!("{:?}", err);
    msg.contains("NoSuchKey") || msg.contains("404")
}

#[async_trait]
impl OssClient for AliyunOssClient {
    // 以 max-keys=1 的列举探测，存储桶不存在时返回 404 NoSuchBucket
    async fn bucket_exist(&self) -> Result<bool, OssError> {
        let request = self.signed_request(RequestType::Get, "max-keys=1", &[])?;
        let resp = common::send(PROVIDER, "bucket_exist", self.config.timeout, request).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        common::ensure_success(PROVIDER, "bucket_exist", resp).await?;
        Ok(true)
    }

    async fn new_bucket(&self) -> Result<(), OssError> {
        let request = self.signed_request(RequestType::Put, "", &[])?;
        let resp = common::send(PROVIDER, "new_bucket", self.config.timeout, request).await?;
        common::ensure_success(PROVIDER, "new_bucket", resp).await?;
        Ok(())
    }

    async fn remove_bucket(&self) -> Result<(), OssError> {
        let request = self.signed_request(RequestType::Delete, "", &[])?;
        let resp = common::send(PROVIDER, "remove_bucket", self.config.timeout, request).await?;
        common::ensure_success(PROVIDER, "remove_bucket", resp).await?;
        Ok(())
    }

    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let data = common::read_local_file(file_path).await?;
        common::with_timeout(PROVIDER, "put_object", self.config.timeout, async {
            self.client
                .pub_object_from_buffer(object_name, &data, self.sdk_request())
                .await
                .map_err(|e| OssError::from_provider(e, PROVIDER, "put_object"))
        })
        .await
    }

    async fn get_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let data = common::with_timeout(PROVIDER, "get_object", self.config.timeout, async {
            self.client
                .get_object(object_name, self.sdk_request())
                .await
                .map_err(|e| {
                    if is_not_found(&e) {
                        OssError::NotFound {
                            key: object_name.to_string(),
                        }
                    } else {
                        OssError::from_provider(e, PROVIDER, "get_object")
                    }
                })
        })
        .await?;

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
            let page = self.list_page(prefix, start_after, token.as_deref()).await?;

            objects.extend(page.contents.into_iter().map(|c| ObjectInfo {
                last_modified: common::parse_time(&c.last_modified),
                etag: common::trim_etag(&c.etag),
                key: c.key,
                size: c.size,
                storage_class: c.storage_class,
            }));

            token = page.next_continuation_token.filter(|t| !t.is_empty());
            if !page.is_truncated || token.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    async fn remove_object(&self, object_name: &str) -> Result<(), OssError> {
        common::with_timeout(PROVIDER, "remove_object", self.config.timeout, async {
            self.client
                .delete_object(object_name, self.sdk_request())
                .await
                .map_err(|e| OssError::from_provider(e, PROVIDER, "remove_object"))
        })
        .await
    }

    async fn object_exist(&self, object_name: &str) -> Result<bool, OssError> {
        common::with_timeout(PROVIDER, "object_exist", self.config.timeout, async {
            match self
                .client
                .get_object_metadata(object_name, self.sdk_request())
                .await
            {
                Ok(_) => Ok(true),
                Err(e) if is_not_found(&e) => Ok(false),
                Err(e) => Err(OssError::from_provider(e, PROVIDER, "object_exist")),
            }
        })
        .await
    }
}

impl TryFrom<AliyunOssClientConfig> for AliyunOssClient {
    type Error = OssError;

    fn try_from(config: AliyunOssClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Box<AliyunOssClient>> for Box<dyn OssClient> {
    fn from(client: Box<AliyunOssClient>) -> Self {
        client as Box<dyn OssClient>
    }
}
