// API 文档参考：
// 七牛云对象存储 API: https://developer.qiniu.com/kodo/1234/api-overview
// 管理凭证: https://developer.qiniu.com/kodo/1201/access-token
// 上传凭证: https://developer.qiniu.com/kodo/1208/upload-token
// 下载凭证: https://developer.qiniu.com/kodo/1202/download-token

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{DateTime, Utc};
use garde::Validate;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::path::Path;
use std::time::Duration;

use crate::cfg::serde_duration::{serde_as, HumanDur};
use crate::oss::common::{self, encode_key};
use crate::oss::{ObjectInfo, OssClient, OssError};

const PROVIDER: &str = "Qiniu Kodo";

/// 资源不存在
const CODE_NO_SUCH_ENTRY: u16 = 612;
/// 空间不存在
const CODE_NO_SUCH_BUCKET: u16 = 631;

/// 上传凭证与下载链接的有效期
const TOKEN_TTL_SECS: i64 = 3600;

/// 七牛云 Kodo 配置
#[serde_as]
#[derive(Debug, Deserialize, Serialize, SmartDefault, Clone, Validate)]
#[serde(default)]
pub struct QiniuKodoClientConfig {
    #[garde(skip)]
    pub access_key: String,

    #[garde(skip)]
    pub secret_key: String,

    #[garde(pattern(r"^[a-zA-Z0-9._\-]*$"))]
    pub bucket: String,

    /// 空间绑定的下载域名，下载时生成私有链接
    #[garde(skip)]
    pub domain: String,

    /// 创建空间时使用的区域 ID，例如 z0（华东）、z1（华北）
    #[garde(skip)]
    #[default = "z0"]
    pub region: String,

    #[garde(skip)]
    pub use_ssl: bool,

    #[garde(skip)]
    #[default = "rs.qiniuapi.com"]
    pub rs_host: String,

    #[garde(skip)]
    #[default = "rsf.qiniuapi.com"]
    pub rsf_host: String,

    #[garde(skip)]
    #[default = "uc.qiniuapi.com"]
    pub uc_host: String,

    #[garde(skip)]
    #[default = "up.qiniup.com"]
    pub up_host: String,

    #[garde(skip)]
    #[serde_as(as = "HumanDur")]
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ListResult {
    #[serde(default)]
    marker: String,
    #[serde(default)]
    items: Vec<ListItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItem {
    key: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    fsize: i64,
    /// 单位为 100 纳秒
    #[serde(default)]
    put_time: i64,
    /// 0 标准存储，1 低频存储，2 归档存储，3 深度归档存储
    #[serde(rename = "type", default)]
    file_type: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutPolicy {
    scope: String,
    deadline: i64,
    insert_only: u8,
}

/// 七牛云 Kodo 实现
pub struct QiniuKodoClient {
    http: reqwest::Client,
    rs_url: String,
    rsf_url: String,
    uc_url: String,
    up_url: String,
    config: QiniuKodoClientConfig,
}

impl QiniuKodoClient {
    pub fn new(config: QiniuKodoClientConfig) -> Result<Self, OssError> {
        common::validate(&config)?;

        let http = common::http_client(PROVIDER, config.timeout)?;

        Ok(Self {
            http,
            rs_url: common::endpoint_url(&config.rs_host, config.use_ssl),
            rsf_url: common::endpoint_url(&config.rsf_host, config.use_ssl),
            uc_url: common::endpoint_url(&config.uc_host, config.use_ssl),
            up_url: common::endpoint_url(&config.up_host, config.use_ssl),
            config,
        })
    }

    fn sign(&self, data: &str) -> String {
        URL_SAFE.encode(common::hmac_sha1(
            self.config.secret_key.as_bytes(),
            data.as_bytes(),
        ))
    }

    fn encoded_entry(&self, key: &str) -> String {
        URL_SAFE.encode(format!("{}:{}", self.config.bucket, key))
    }

    /// 管理凭证：对 `path[?query]\n` 签名
    fn qbox_token(&self, path_and_query: &str) -> String {
        format!(
            "QBox {}:{}",
            self.config.access_key,
            self.sign(&format!("{}\n", path_and_query))
        )
    }

    /// 上传凭证，scope 精确到 `bucket:key`，允许覆盖
    fn upload_token(&self, key: &str) -> Result<String, OssError> {
        let policy = PutPolicy {
            scope: format!("{}:{}", self.config.bucket, key),
            deadline: Utc::now().timestamp() + TOKEN_TTL_SECS,
            insert_only: 0,
        };
        let encoded_policy = URL_SAFE.encode(serde_json::to_vec(&policy)?);

        Ok(format!(
            "{}:{}:{}",
            self.config.access_key,
            self.sign(&encoded_policy),
            encoded_policy
        ))
    }

    /// 私有空间下载链接，有效期一小时
    fn private_url(&self, key: &str) -> Result<String, OssError> {
        if self.config.domain.is_empty() {
            return Err(OssError::Configuration(
                "七牛云下载需要配置 domain".to_string(),
            ));
        }

        let deadline = Utc::now().timestamp() + TOKEN_TTL_SECS;
        let base = format!(
            "{}/{}?e={}",
            common::endpoint_url(&self.config.domain, self.config.use_ssl),
            encode_key(key),
            deadline
        );
        let token = format!("{}:{}", self.config.access_key, self.sign(&base));

        Ok(format!("{}&token={}", base, token))
    }

    /// 发送管理请求，path_and_query 参与签名
    async fn manage(
        &self,
        operation: &str,
        method: reqwest::Method,
        base_url: &str,
        path_and_query: &str,
    ) -> Result<reqwest::Response, OssError> {
        let request = self
            .http
            .request(method, format!("{}{}", base_url, path_and_query))
            .header("Authorization", self.qbox_token(path_and_query))
            .header("Content-Type", "application/x-www-form-urlencoded");

        common::send(PROVIDER, operation, self.config.timeout, request).await
    }

    async fn manage_ok(
        &self,
        operation: &str,
        base_url: &str,
        path_and_query: &str,
    ) -> Result<(), OssError> {
        let resp = self
            .manage(operation, reqwest::Method::POST, base_url, path_and_query)
            .await?;
        common::ensure_success(PROVIDER, operation, resp).await?;
        Ok(())
    }

    async fn list_page(&self, prefix: &str, marker: &str) -> Result<ListResult, OssError> {
        let path = format!(
            "/list?bucket={}&prefix={}&marker={}&limit=1000",
            urlencoding::encode(&self.config.bucket),
            urlencoding::encode(prefix),
            urlencoding::encode(marker)
        );
        let resp = self
            .manage("list_objects", reqwest::Method::POST, &self.rsf_url, &path)
            .await?;
        let resp = common::ensure_success(PROVIDER, "list_objects", resp).await?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| OssError::from_provider(e, PROVIDER, "list_objects"))?;

        serde_json::from_slice(&body).map_err(|e| OssError::decode(PROVIDER, e))
    }
}

fn put_time(t: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(t / 10_000_000, ((t % 10_000_000) * 100) as u32).unwrap_or_default()
}

fn storage_class(file_type: i32) -> &'static str {
    match file_type {
        1 => "LINE",
        2 => "ARCHIVE",
        3 => "DEEP_ARCHIVE",
        _ => "STANDARD",
    }
}

#[async_trait]
impl OssClient for QiniuKodoClient {
    async fn bucket_exist(&self) -> Result<bool, OssError> {
        let path = format!(
            "/v2/bucketInfo?bucket={}",
            urlencoding::encode(&self.config.bucket)
        );
        let resp = self
            .manage("bucket_exist", reqwest::Method::POST, &self.uc_url, &path)
            .await?;
        if resp.status().as_u16() == CODE_NO_SUCH_BUCKET {
            return Ok(false);
        }
        common::ensure_success(PROVIDER, "bucket_exist", resp).await?;
        Ok(true)
    }

    async fn new_bucket(&self) -> Result<(), OssError> {
        let path = format!(
            "/mkbucketv3/{}/region/{}",
            self.config.bucket, self.config.region
        );
        self.manage_ok("new_bucket", &self.uc_url, &path).await
    }

    async fn remove_bucket(&self) -> Result<(), OssError> {
        let path = format!("/drop/{}", self.config.bucket);
        self.manage_ok("remove_bucket", &self.uc_url, &path).await
    }

    // 表单上传
    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let data = common::read_local_file(file_path).await?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| object_name.to_string());

        let form = Form::new()
            .text("token", self.upload_token(object_name)?)
            .text("key", object_name.to_string())
            .part("file", Part::bytes(data).file_name(file_name));

        let request = self.http.post(format!("{}/", self.up_url)).multipart(form);
        let resp = common::send(PROVIDER, "put_object", self.config.timeout, request).await?;
        common::ensure_success(PROVIDER, "put_object", resp).await?;
        Ok(())
    }

    async fn get_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let url = self.private_url(object_name)?;
        let resp = common::send(
            PROVIDER,
            "get_object",
            self.config.timeout,
            self.http.get(url),
        )
        .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OssError::NotFound {
                key: object_name.to_string(),
            });
        }
        let resp = common::ensure_success(PROVIDER, "get_object", resp).await?;
        common::save_response(PROVIDER, "get_object", resp, file_path).await
    }

    // marker 是服务端生成的游标，无法直接用对象名定位，start_after 在客户端过滤
    async fn list_objects(
        &self,
        prefix: &str,
        start_after: &str,
    ) -> Result<Vec<ObjectInfo>, OssError> {
        let mut objects = Vec::new();
        let mut marker = String::new();

        loop {
            let page = self.list_page(prefix, &marker).await?;

            objects.extend(
                page.items
                    .into_iter()
                    .filter(|item| start_after.is_empty() || item.key.as_str() > start_after)
                    .map(|item| ObjectInfo {
                        last_modified: put_time(item.put_time),
                        storage_class: storage_class(item.file_type).to_string(),
                        etag: item.hash,
                        key: item.key,
                        size: item.fsize,
                    }),
            );

            if page.marker.is_empty() {
                break;
            }
            marker = page.marker;
        }

        Ok(objects)
    }

    async fn remove_object(&self, object_name: &str) -> Result<(), OssError> {
        let path = format!("/delete/{}", self.encoded_entry(object_name));
        self.manage_ok("remove_object", &self.rs_url, &path).await
    }

    async fn object_exist(&self, object_name: &str) -> Result<bool, OssError> {
        let path = format!("/stat/{}", self.encoded_entry(object_name));
        let resp = self
            .manage("object_exist", reqwest::Method::GET, &self.rs_url, &path)
            .await?;
        if resp.status().as_u16() == CODE_NO_SUCH_ENTRY {
            return Ok(false);
        }
        common::ensure_success(PROVIDER, "object_exist", resp).await?;
        Ok(true)
    }
}

impl TryFrom<QiniuKodoClientConfig> for QiniuKodoClient {
    type Error = OssError;

    fn try_from(config: QiniuKodoClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Box<QiniuKodoClient>> for Box<dyn OssClient> {
    fn from(client: Box<QiniuKodoClient>) -> Self {
        client as Box<dyn OssClient>
    }
}
