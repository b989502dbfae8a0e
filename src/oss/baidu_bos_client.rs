// API 文档参考：
// 百度智能云 BOS API 参考: https://cloud.baidu.com/doc/BOS/s/Ikc5nv3wc
// 鉴权认证机制: https://cloud.baidu.com/doc/Reference/s/njwvz1yfu

use async_trait::async_trait;
use chrono::Utc;
use garde::Validate;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::path::Path;
use std::time::Duration;

use crate::cfg::serde_duration::{serde_as, HumanDur};
use crate::oss::common::{self, encode_key};
use crate::oss::{ObjectInfo, OssClient, OssError};

const PROVIDER: &str = "Baidu BOS";

const SIGN_EXPIRATION_SECS: i64 = 1800;

/// 百度智能云 BOS 配置
#[serde_as]
#[derive(Debug, Deserialize, Serialize, SmartDefault, Clone, Validate)]
#[serde(default)]
pub struct BaiduBosClientConfig {
    /// 服务域名，例如 `bj.bcebos.com`
    #[garde(skip)]
    #[default = "bj.bcebos.com"]
    pub endpoint: String,

    #[garde(skip)]
    pub access_key: String,

    #[garde(skip)]
    pub secret_key: String,

    /// 允许为空，便于以占位配置构造客户端
    #[garde(pattern(r"^[a-zA-Z0-9._\-]*$"))]
    pub bucket: String,

    #[garde(skip)]
    #[default = true]
    pub use_ssl: bool,

    #[garde(skip)]
    #[serde_as(as = "HumanDur")]
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,
}

// ListObjects 响应（JSON）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_marker: Option<String>,
    #[serde(default)]
    contents: Vec<BosObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BosObject {
    key: String,
    #[serde(default)]
    last_modified: String,
    #[serde(default)]
    e_tag: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    storage_class: String,
}

/// 百度智能云 BOS 实现，使用 path-style 地址 `{endpoint}/{bucket}/{key}`
pub struct BaiduBosClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
    config: BaiduBosClientConfig,
}

impl BaiduBosClient {
    pub fn new(config: BaiduBosClientConfig) -> Result<Self, OssError> {
        common::validate(&config)?;

        let http = common::http_client(PROVIDER, config.timeout)?;
        let base_url = common::endpoint_url(&config.endpoint, config.use_ssl);
        let host = common::endpoint_host(&base_url);

        Ok(Self {
            http,
            base_url,
            host,
            config,
        })
    }

    /// bce-auth-v1 签名，只签 host 头
    fn authorization(&self, method: &Method, uri: &str, query: &[(&str, &str)]) -> String {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let auth_prefix = format!(
            "bce-auth-v1/{}/{}/{}",
            self.config.access_key, timestamp, SIGN_EXPIRATION_SECS
        );
        let signing_key = hex::encode(common::hmac_sha256(
            self.config.secret_key.as_bytes(),
            auth_prefix.as_bytes(),
        ));

        let mut params: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        params.sort();

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}",
            method.as_str(),
            uri,
            params.join("&"),
            urlencoding::encode(&self.host)
        );
        let signature = hex::encode(common::hmac_sha256(
            signing_key.as_bytes(),
            canonical_request.as_bytes(),
        ));

        format!("{}/host/{}", auth_prefix, signature)
    }

    fn request(&self, method: Method, key: &str, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let uri = if key.is_empty() {
            format!("/{}", self.config.bucket)
        } else {
            format!("/{}/{}", self.config.bucket, encode_key(key))
        };
        let auth = self.authorization(&method, &uri, query);

        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, uri))
            .header("Authorization", auth);
        if !query.is_empty() {
            builder = builder.query(query);
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
            .execute(operation, self.request(Method::HEAD, key, &[]))
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        common::ensure_success(PROVIDER, operation, resp).await?;
        Ok(true)
    }

    async fn simple(&self, operation: &str, method: Method, key: &str) -> Result<(), OssError> {
        let resp = self.execute(operation, self.request(method, key, &[])).await?;
        common::ensure_success(PROVIDER, operation, resp).await?;
        Ok(())
    }

    async fn list_page(&self, prefix: &str, marker: &str) -> Result<ListObjectsResult, OssError> {
        let query = [("prefix", prefix), ("marker", marker), ("maxKeys", "1000")];
        let resp = self
            .execute("list_objects", self.request(Method::GET, "", &query))
            .await?;
        let resp = common::ensure_success(PROVIDER, "list_objects", resp).await?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| OssError::from_provider(e, PROVIDER, "list_objects"))?;

        serde_json::from_slice(&body).map_err(|e| OssError::decode(PROVIDER, e))
    }
}

#[async_trait]
impl OssClient for BaiduBosClient {
    async fn bucket_exist(&self) -> Result<bool, OssError> {
        self.head("bucket_exist", "").await
    }

    async fn new_bucket(&self) -> Result<(), OssError> {
        self.simple("new_bucket", Method::PUT, "").await
    }

    async fn remove_bucket(&self) -> Result<(), OssError> {
        self.simple("remove_bucket", Method::DELETE, "").await
    }

    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let data = common::read_local_file(file_path).await?;
        let request = self
            .request(Method::PUT, object_name, &[])
            .header("Content-Type", "application/octet-stream")
            .body(data);
        let resp = self.execute("put_object", request).await?;
        common::ensure_success(PROVIDER, "put_object", resp).await?;
        Ok(())
    }

    async fn get_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let resp = self
            .execute("get_object", self.request(Method::GET, object_name, &[]))
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
                etag: common::trim_etag(&c.e_tag),
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
        self.simple("remove_object", Method::DELETE, object_name).await
    }

    async fn object_exist(&self, object_name: &str) -> Result<bool, OssError> {
        self.head("object_exist", object_name).await
    }
}

impl TryFrom<BaiduBosClientConfig> for BaiduBosClient {
    type Error = OssError;

    fn try_from(config: BaiduBosClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Box<BaiduBosClient>> for Box<dyn OssClient> {
    fn from(client: Box<BaiduBosClient>) -> Self {
        client as Box<dyn OssClient>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::Server) -> BaiduBosClient {
        BaiduBosClient::new(BaiduBosClientConfig {
            endpoint: server.url(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            bucket: "test-bucket".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn object(key: &str) -> serde_json::Value {
        json!({
            "key": key,
            "lastModified": "2019-05-24T10:56:40Z",
            "eTag": "\"abc\"",
            "size": 5,
            "storageClass": "STANDARD",
        })
    }

    #[test]
    fn test_invalid_bucket_rejected() {
        let result = BaiduBosClient::new(BaiduBosClientConfig {
            bucket: "bad/bucket".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(OssError::Configuration(_))));
    }

    #[test]
    fn test_authorization_format() {
        let client = BaiduBosClient::new(BaiduBosClientConfig {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            bucket: "test-bucket".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url, "https://bj.bcebos.com");
        assert_eq!(client.host, "bj.bcebos.com");

        let auth = client.authorization(&Method::GET, "/test-bucket", &[("prefix", "a/")]);
        let parts: Vec<&str> = auth.split('/').collect();
        assert_eq!(parts[0], "bce-auth-v1");
        assert_eq!(parts[1], "ak");
        assert_eq!(parts[3], "1800");
        assert_eq!(parts[4], "host");
        assert_eq!(parts[5].len(), 64);
    }

    #[tokio::test]
    async fn test_list_objects_merges_pages() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/test-bucket")
            .match_query(Matcher::UrlEncoded("marker".into(), "".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "name": "test-bucket",
                    "isTruncated": true,
                    "nextMarker": "a/2.txt",
                    "contents": [object("a/1.txt"), object("a/2.txt")],
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/test-bucket")
            .match_query(Matcher::UrlEncoded("marker".into(), "a/2.txt".into()))
            .with_status(200)
            .with_body(
                json!({
                    "name": "test-bucket",
                    "isTruncated": false,
                    "contents": [object("a/3.txt")],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let objects = client_for(&server).list_objects("a/", "").await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[2].key, "a/3.txt");
        assert_eq!(objects[0].etag, "abc");
        assert_eq!(objects[0].size, 5);
        assert_eq!(objects[0].last_modified.timestamp(), 1558695400);
    }

    #[tokio::test]
    async fn test_bucket_exist() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/test-bucket")
            .with_status(404)
            .create_async()
            .await;

        assert!(!client_for(&server).bucket_exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_object_exist() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/test-bucket/a/b.txt")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("HEAD", "/test-bucket/missing.txt")
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.object_exist("a/b.txt").await.unwrap());
        assert!(!client.object_exist("missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_object_error_propagated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/test-bucket/a/b.txt")
            .with_status(403)
            .with_body(r#"{"code":"AccessDenied"}"#)
            .create_async()
            .await;

        let err = client_for(&server).remove_object("a/b.txt").await.unwrap_err();
        assert!(matches!(err, OssError::Http { status: 403, .. }));
    }
}
