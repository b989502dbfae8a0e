// API 文档参考：
// 腾讯云 COS API 参考: https://cloud.tencent.com/document/product/436/7751
// 请求签名: https://cloud.tencent.com/document/product/436/7778

use async_trait::async_trait;
use chrono::Utc;
use garde::Validate;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use smart_default::SmartDefault;
use std::path::Path;
use std::time::Duration;

use crate::cfg::serde_duration::{serde_as, HumanDur};
use crate::oss::common::{self, encode_key};
use crate::oss::{ObjectInfo, OssClient, OssError};

const PROVIDER: &str = "Tencent COS";

/// 签名有效期
const SIGN_VALID_SECS: i64 = 3600;

/// 腾讯云 COS 配置
///
/// COS 的存储桶由访问域名决定，例如
/// `https://examplebucket-1250000000.cos.ap-guangzhou.myqcloud.com`
#[serde_as]
#[derive(Debug, Deserialize, Serialize, SmartDefault, Clone, Validate)]
#[serde(default)]
pub struct TencentCosClientConfig {
    /// 存储桶访问域名
    #[garde(skip)]
    pub bucket_url: String,

    /// SecretId，建议使用子账号密钥
    #[garde(skip)]
    pub secret_id: String,

    #[garde(skip)]
    pub secret_key: String,

    /// 单次请求超时
    #[garde(skip)]
    #[serde_as(as = "HumanDur")]
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,
}

// GET Bucket 响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_marker: Option<String>,
    #[serde(default)]
    contents: Vec<CosObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CosObject {
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

/// 腾讯云 COS 实现
pub struct TencentCosClient {
    http: reqwest::Client,
    base_url: String,
    config: TencentCosClientConfig,
}

impl TencentCosClient {
    pub fn new(config: TencentCosClientConfig) -> Result<Self, OssError> {
        common::validate(&config)?;

        let http = common::http_client(PROVIDER, config.timeout)?;
        let base_url = common::endpoint_url(&config.bucket_url, true);

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    /// 生成 Authorization 头
    ///
    /// 只对方法和路径签名，q-header-list 与 q-url-param-list 留空
    fn authorization(&self, method: &Method, path: &str) -> String {
        let now = Utc::now().timestamp();
        let key_time = format!("{};{}", now - 60, now + SIGN_VALID_SECS);

        let sign_key = hex::encode(common::hmac_sha1(
            self.config.secret_key.as_bytes(),
            key_time.as_bytes(),
        ));
        let http_string = format!("{}\n{}\n\n\n", method.as_str().to_lowercase(), path);
        let string_to_sign = format!(
            "sha1\n{}\n{}\n",
            key_time,
            hex::encode(Sha1::digest(http_string.as_bytes()))
        );
        let signature = hex::encode(common::hmac_sha1(
            sign_key.as_bytes(),
            string_to_sign.as_bytes(),
        ));

        format!(
            "q-sign-algorithm=sha1&q-ak={}&q-sign-time={}&q-key-time={}&q-header-list=&q-url-param-list=&q-signature={}",
            self.config.secret_id, key_time, key_time, signature
        )
    }

    fn request(&self, method: Method, key: &str) -> reqwest::RequestBuilder {
        let path = format!("/{}", key);
        let url = format!("{}/{}", self.base_url, encode_key(key));
        let auth = self.authorization(&method, &path);
        self.http.request(method, url).header("Authorization", auth)
    }

    async fn execute(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, OssError> {
        common::send(PROVIDER, operation, self.config.timeout, request).await
    }

    /// HEAD 请求，404 视为不存在
    async fn head(&self, operation: &str, key: &str) -> Result<bool, OssError> {
        let resp = self.execute(operation, self.request(Method::HEAD, key)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        common::ensure_success(PROVIDER, operation, resp).await?;
        Ok(true)
    }

    async fn list_page(&self, prefix: &str, marker: &str) -> Result<ListBucketResult, OssError> {
        let request = self.request(Method::GET, "").query(&[
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
impl OssClient for TencentCosClient {
    async fn bucket_exist(&self) -> Result<bool, OssError> {
        self.head("bucket_exist", "").await
    }

    async fn new_bucket(&self) -> Result<(), OssError> {
        let resp = self.execute("new_bucket", self.request(Method::PUT, "")).await?;
        common::ensure_success(PROVIDER, "new_bucket", resp).await?;
        Ok(())
    }

    async fn remove_bucket(&self) -> Result<(), OssError> {
        let resp = self
            .execute("remove_bucket", self.request(Method::DELETE, ""))
            .await?;
        common::ensure_success(PROVIDER, "remove_bucket", resp).await?;
        Ok(())
    }

    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let data = common::read_local_file(file_path).await?;
        let request = self
            .request(Method::PUT, object_name)
            .header("Content-Type", "application/octet-stream")
            .body(data);
        let resp = self.execute("put_object", request).await?;
        common::ensure_success(PROVIDER, "put_object", resp).await?;
        Ok(())
    }

    async fn get_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let resp = self
            .execute("get_object", self.request(Method::GET, object_name))
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OssError::NotFound {
                key: object_name.to_string(),
            });
        }
        let resp = common::ensure_success(PROVIDER, "get_object", resp).await?;
        common::save_response(PROVIDER, "get_object", resp, file_path).await
    }

    // 以 marker 翻页，直到 IsTruncated 为 false
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
            // 未指定 delimiter 时 COS 可能不返回 NextMarker，此时以本页最后一个 key 续翻
            match page.next_marker.filter(|m| !m.is_empty()).or(last_key) {
                Some(next) => marker = next,
                None => break,
            }
        }

        Ok(objects)
    }

    async fn remove_object(&self, object_name: &str) -> Result<(), OssError> {
        let resp = self
            .execute("remove_object", self.request(Method::DELETE, object_name))
            .await?;
        common::ensure_success(PROVIDER, "remove_object", resp).await?;
        Ok(())
    }

    async fn object_exist(&self, object_name: &str) -> Result<bool, OssError> {
        self.head("object_exist", object_name).await
    }
}

impl TryFrom<TencentCosClientConfig> for TencentCosClient {
    type Error = OssError;

    fn try_from(config: TencentCosClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Box<TencentCosClient>> for Box<dyn OssClient> {
    fn from(client: Box<TencentCosClient>) -> Self {
        client as Box<dyn OssClient>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> TencentCosClient {
        TencentCosClient::new(TencentCosClientConfig {
            bucket_url: server.url(),
            secret_id: "AKIDEXAMPLE".to_string(),
            secret_key: "secret".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn page(keys: &[&str], next_marker: Option<&str>) -> String {
        let contents: String = keys
            .iter()
            .map(|k| {
                format!(
                    "<Contents><Key>{}</Key><LastModified>2019-05-24T10:56:40.000Z</LastModified>\
                     <ETag>\"etag-{}\"</ETag><Size>5</Size><StorageClass>STANDARD</StorageClass></Contents>",
                    k, k
                )
            })
            .collect();
        format!(
            "<ListBucketResult><Name>test-bucket</Name><IsTruncated>{}</IsTruncated>{}{}</ListBucketResult>",
            next_marker.is_some(),
            next_marker
                .map(|m| format!("<NextMarker>{}</NextMarker>", m))
                .unwrap_or_default(),
            contents
        )
    }

    #[test]
    fn test_config_defaults() {
        let config: TencentCosClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(15));

        let config: TencentCosClientConfig =
            serde_json::from_str(r#"{"timeout": "30s"}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_authorization_format() {
        let client = TencentCosClient::new(TencentCosClientConfig {
            bucket_url: "examplebucket-1250000000.cos.ap-guangzhou.myqcloud.com".to_string(),
            secret_id: "AKIDEXAMPLE".to_string(),
            secret_key: "secret".to_string(),
            ..Default::default()
        })
        .unwrap();

        let auth = client.authorization(&Method::GET, "/a/b.txt");
        assert!(auth.starts_with("q-sign-algorithm=sha1&q-ak=AKIDEXAMPLE&q-sign-time="));
        let signature = auth.rsplit("q-signature=").next().unwrap();
        assert_eq!(signature.len(), 40);
        assert_eq!(client.base_url, "https://examplebucket-1250000000.cos.ap-guangzhou.myqcloud.com");
    }

    #[tokio::test]
    async fn test_list_objects_merges_pages() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded("marker".into(), "".into()))
            .with_status(200)
            .with_body(page(&["a/1.txt", "a/2.txt"], Some("a/2.txt")))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded("marker".into(), "a/2.txt".into()))
            .with_status(200)
            .with_body(page(&["a/3.txt"], None))
            .create_async()
            .await;

        let objects = client_for(&server).list_objects("a/", "").await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/1.txt", "a/2.txt", "a/3.txt"]);
        assert_eq!(objects[0].etag, "etag-a/1.txt");
        assert_eq!(objects[0].storage_class, "STANDARD");
        assert_eq!(objects[0].last_modified.timestamp(), 1558695400);
    }

    #[tokio::test]
    async fn test_list_objects_starts_after_marker() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded("marker".into(), "a/1.txt".into()))
            .with_status(200)
            .with_body(page(&["a/2.txt"], None))
            .create_async()
            .await;

        let objects = client_for(&server).list_objects("", "a/1.txt").await.unwrap();

        mock.assert_async().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "a/2.txt");
    }

    #[tokio::test]
    async fn test_object_exist() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/a/b.txt")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("HEAD", "/missing.txt")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("HEAD", "/forbidden.txt")
            .with_status(403)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.object_exist("a/b.txt").await.unwrap());
        assert!(!client.object_exist("missing.txt").await.unwrap());
        assert!(client.object_exist("forbidden.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_get_object_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.txt")
            .with_status(404)
            .with_body("<Error><Code>NoSuchKey</Code></Error>")
            .create_async()
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let err = client_for(&server)
            .get_object("missing.txt", &dir.path().join("out.txt"))
            .await
            .unwrap_err();

        assert!(matches!(err, OssError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_put_then_get_object() {
        let mut server = mockito::Server::new_async().await;
        let put = server
            .mock("PUT", "/a/b.txt")
            .match_body("hello")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/a/b.txt")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("hello.txt");
        let dst = dir.path().join("out.txt");
        std::fs::write(&src, "hello").unwrap();

        let client = client_for(&server);
        client.put_object("a/b.txt", &src).await.unwrap();
        client.get_object("a/b.txt", &dst).await.unwrap();

        put.assert_async().await;
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_new_bucket_conflict_is_propagated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/")
            .with_status(409)
            .with_body("<Error><Code>BucketAlreadyExists</Code></Error>")
            .create_async()
            .await;

        let err = client_for(&server).new_bucket().await.unwrap_err();
        match err {
            OssError::Http { status, message, .. } => {
                assert_eq!(status, 409);
                assert!(message.contains("BucketAlreadyExists"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
