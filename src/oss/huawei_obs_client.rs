// API 文档参考：
// 华为云 OBS API 参考: https://support.huaweicloud.com/api-obs/obs_04_0001.html
// Header 中携带签名: https://support.huaweicloud.com/api-obs/obs_04_0010.html

use async_trait::async_trait;
use garde::Validate;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::path::Path;
use std::time::Duration;

use crate::cfg::serde_duration::{serde_as, HumanDur};
use crate::oss::common::{self, encode_key};
use crate::oss::{ObjectInfo, OssClient, OssError};

const PROVIDER: &str = "Huawei OBS";

/// 华为云 OBS 配置
#[serde_as]
#[derive(Debug, Deserialize, Serialize, SmartDefault, Clone, Validate)]
#[serde(default)]
pub struct HuaweiObsClientConfig {
    /// 终端节点，例如 `obs.cn-north-4.myhuaweicloud.com`
    #[garde(skip)]
    #[default = "obs.cn-north-4.myhuaweicloud.com"]
    pub endpoint: String,

    #[garde(skip)]
    pub access_key: String,

    #[garde(skip)]
    pub secret_key: String,

    #[garde(pattern(r"^[a-zA-Z0-9._\-]*$"))]
    pub bucket: String,

    /// 创建存储桶时使用的区域
    #[garde(skip)]
    #[default = "cn-north-4"]
    pub location: String,

    #[garde(skip)]
    #[default = true]
    pub use_ssl: bool,

    /// 使用 `{endpoint}/{bucket}` 形式的地址，默认使用虚拟主机形式 `{bucket}.{endpoint}`
    #[garde(skip)]
    pub path_style: bool,

    #[garde(skip)]
    #[serde_as(as = "HumanDur")]
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_marker: Option<String>,
    #[serde(default)]
    contents: Vec<ObsObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObsObject {
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

/// 华为云 OBS 实现
pub struct HuaweiObsClient {
    http: reqwest::Client,
    bucket_url: String,
    config: HuaweiObsClientConfig,
}

impl HuaweiObsClient {
    pub fn new(config: HuaweiObsClientConfig) -> Result<Self, OssError> {
        common::validate(&config)?;

        let http = common::http_client(PROVIDER, config.timeout)?;
        let endpoint = common::endpoint_url(&config.endpoint, config.use_ssl);
        let bucket_url = if config.path_style {
            format!("{}/{}", endpoint, config.bucket)
        } else {
            let (scheme, host) = endpoint.split_once("://").unwrap_or(("https", endpoint.as_str()));
            format!("{}://{}.{}", scheme, config.bucket, host)
        };

        Ok(Self {
            http,
            bucket_url,
            config,
        })
    }

    /// StringToSign = VERB\nContent-MD5\nContent-Type\nDate\nCanonicalizedHeaders CanonicalizedResource
    fn signature(
        &self,
        method: &Method,
        content_type: &str,
        date: &str,
        obs_headers: &[(&str, &str)],
        resource: &str,
    ) -> String {
        let mut headers: Vec<String> = obs_headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k.to_lowercase(), v.trim()))
            .collect();
        headers.sort();

        let string_to_sign = format!(
            "{}\n\n{}\n{}\n{}{}",
            method.as_str(),
            content_type,
            date,
            headers.concat(),
            resource
        );
        common::base64_hmac_sha1(self.config.secret_key.as_bytes(), string_to_sign.as_bytes())
    }

    fn request(
        &self,
        method: Method,
        key: &str,
        content_type: &str,
        obs_headers: &[(&str, &str)],
    ) -> reqwest::RequestBuilder {
        let encoded = encode_key(key);
        let resource = format!("/{}/{}", self.config.bucket, encoded);
        let date = common::gmt_date();
        let signature = self.signature(&method, content_type, &date, obs_headers, &resource);

        let mut builder = self
            .http
            .request(method, format!("{}/{}", self.bucket_url, encoded))
            .header("Date", date)
            .header(
                "Authorization",
                format!("OBS {}:{}", self.config.access_key, signature),
            );
        if !content_type.is_empty() {
            builder = builder.header("Content-Type", content_type);
        }
        for (k, v) in obs_headers {
            builder = builder.header(*k, *v);
        }
        builder
    }

    async fn execute(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, OssError> {
        common::send(PROVIDER, operation, self.config.timeout, request).await
    }

    async fn head(&self, operation: &str, key: &str) -> Result<bool, OssError> {
        let resp = self
            .execute(operation, self.request(Method::HEAD, key, "", &[]))
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        common::ensure_success(PROVIDER, operation, resp).await?;
        Ok(true)
    }

    async fn list_page(&self, prefix: &str, marker: &str) -> Result<ListBucketResult, OssError> {
        let request = self.request(Method::GET, "", "", &[]).query(&[
            ("prefix", prefix),
            ("marker", marker),
            ("max-keys", "1000"),
        ]);
        let resp = self.execute("list_objects", request).await?;
        let resp = common::ensure_success(PROVIDER, "list_objects", resp).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| OssError::from_provider(e, PROVIDER, "list_objects"))?;

        quick_xml::de::from_str(&text).map_err(|e| OssError::decode(PROVIDER, e))
    }
}

#[async_trait]
impl OssClient for HuaweiObsClient {
    async fn bucket_exist(&self) -> Result<bool, OssError> {
        self.head("bucket_exist", "").await
    }

    // 私有读写、温存储、多 AZ 冗余
    async fn new_bucket(&self) -> Result<(), OssError> {
        let body = format!(
            "<CreateBucketConfiguration><Location>{}</Location></CreateBucketConfiguration>",
            self.config.location
        );
        let request = self
            .request(
                Method::PUT,
                "",
                "application/xml",
                &[
                    ("x-obs-acl", "private"),
                    ("x-obs-storage-class", "WARM"),
                    ("x-obs-az-redundancy", "3az"),
                ],
            )
            .body(body);
        let resp = self.execute("new_bucket", request).await?;
        common::ensure_success(PROVIDER, "new_bucket", resp).await?;
        Ok(())
    }

    async fn remove_bucket(&self) -> Result<(), OssError> {
        let resp = self
            .execute("remove_bucket", self.request(Method::DELETE, "", "", &[]))
            .await?;
        common::ensure_success(PROVIDER, "remove_bucket", resp).await?;
        Ok(())
    }

    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let data = common::read_local_file(file_path).await?;
        let request = self
            .request(Method::PUT, object_name, "application/octet-stream", &[])
            .body(data);
        let resp = self.execute("put_object", request).await?;
        common::ensure_success(PROVIDER, "put_object", resp).await?;
        Ok(())
    }

    async fn get_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let resp = self
            .execute("get_object", self.request(Method::GET, object_name, "", &[]))
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OssError::NotFound {
                key: object_name.to_string(),
            });
        }
        let resp = common::ensure_success(PROVIDER, "get_object", resp).await?;
        common::save_response(PROVIDER, "get_object", resp, file_path).await
    }

    async fn list_objects(
        &self,
        prefix: &str,
        start_after: &str,
    ) -> Result<Vec<ObjectInfo>, OssError> {
        let mut objects = Vec::new();
        let mut marker = start_after.to_string();

        loop {
            let page = self.list_page(prefix, &marker).await?;
            let last_key = page.contents.last().map(|c| c.key.clone());

            objects.extend(page.contents.into_iter().map(|c| ObjectInfo {
                last_modified: common::parse_time(&c.last_modified),
                etag: common::trim_etag(&c.etag),
                key: c.key,
                size: c.size,
                storage_class: c.storage_class,
            }));

            if !page.is_truncated {
                break;
            }
            match page.next_marker.filter(|m| !m.is_empty()).or(last_key) {
                Some(next) => marker = next,
                None => break,
            }
        }

        Ok(objects)
    }

    async fn remove_object(&self, object_name: &str) -> Result<(), OssError> {
        let resp = self
            .execute(
                "remove_object",
                self.request(Method::DELETE, object_name, "", &[]),
            )
            .await?;
        common::ensure_success(PROVIDER, "remove_object", resp).await?;
        Ok(())
    }

    async fn object_exist(&self, object_name: &str) -> Result<bool, OssError> {
        self.head("object_exist", object_name).await
    }
}

impl TryFrom<HuaweiObsClientConfig> for HuaweiObsClient {
    type Error = OssError;

    fn try_from(config: HuaweiObsClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Box<HuaweiObsClient>> for Box<dyn OssClient> {
    fn from(client: Box<HuaweiObsClient>) -> Self {
        client as Box<dyn OssClient>
    }
}
