// API 文档参考：
// 又拍云 REST API: https://help.upyun.com/knowledge-base/rest_api/
// 签名认证: https://help.upyun.com/knowledge-base/object_storage_authorization/

use async_trait::async_trait;
use garde::Validate;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use crate::cfg::serde_duration::{serde_as, HumanDur};
use crate::oss::common::{self, encode_key};
use crate::oss::{ObjectInfo, OssClient, OssError};

const PROVIDER: &str = "UpYun USS";

/// 列目录结束标志
const LIST_ITER_EOF: &str = "g2gCZAAEbmV4dGQAA2VvZg";

/// 又拍云 USS 配置
///
/// 又拍云的服务（存储桶）只能在控制台创建，`bucket` 即服务名
#[serde_as]
#[derive(Debug, Deserialize, Serialize, SmartDefault, Clone, Validate)]
#[serde(default)]
pub struct UpyunUssClientConfig {
    #[garde(skip)]
    pub operator: String,

    #[garde(skip)]
    pub password: String,

    #[garde(pattern(r"^[a-zA-Z0-9._\-]*$"))]
    pub bucket: String,

    #[garde(skip)]
    #[default = "v0.api.upyun.com"]
    pub endpoint: String,

    #[garde(skip)]
    #[default = true]
    pub use_ssl: bool,

    #[garde(skip)]
    #[serde_as(as = "HumanDur")]
    #[default(Duration::from_secs(15))]
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ListResult {
    #[serde(default)]
    files: Vec<FileInfo>,
    #[serde(default)]
    iter: String,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    name: String,
    #[serde(rename = "type", default)]
    file_type: String,
    #[serde(default)]
    length: i64,
    /// Unix 秒
    #[serde(default)]
    last_modified: i64,
}

impl FileInfo {
    fn is_folder(&self) -> bool {
        self.file_type == "folder" || self.file_type == "F"
    }
}

/// 又拍云 USS 实现
pub struct UpyunUssClient {
    http: reqwest::Client,
    base_url: String,
    password_md5: String,
    config: UpyunUssClientConfig,
}

impl UpyunUssClient {
    pub fn new(config: UpyunUssClientConfig) -> Result<Self, OssError> {
        common::validate(&config)?;

        let http = common::http_client(PROVIDER, config.timeout)?;
        let base_url = common::endpoint_url(&config.endpoint, config.use_ssl);
        let password_md5 = format!("{:x}", md5::compute(config.password.as_bytes()));

        Ok(Self {
            http,
            base_url,
            password_md5,
            config,
        })
    }

    /// signature = Base64(HMAC-SHA1(MD5(password), METHOD&URI&DATE))
    fn authorization(&self, method: &Method, uri: &str, date: &str) -> String {
        let signature = common::base64_hmac_sha1(
            self.password_md5.as_bytes(),
            format!("{}&{}&{}", method.as_str(), uri, date).as_bytes(),
        );
        format!("UPYUN {}:{}", self.config.operator, signature)
    }

    fn request(&self, method: Method, key: &str) -> reqwest::RequestBuilder {
        let uri = format!("/{}/{}", self.config.bucket, encode_key(key));
        let date = common::gmt_date();
        let auth = self.authorization(&method, &uri, &date);

        self.http
            .request(method, format!("{}{}", self.base_url, uri))
            .header("Date", date)
            .header("Authorization", auth)
    }

    async fn execute(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, OssError> {
        common::send(PROVIDER, operation, self.config.timeout, request).await
    }

    /// 列出单个目录的一页，目录不存在时返回空
    async fn list_dir_page(&self, dir: &str, iter: &str) -> Result<ListResult, OssError> {
        let mut request = self
            .request(Method::GET, dir)
            .header("Accept", "application/json")
            .header("x-list-limit", "1000");
        if !iter.is_empty() {
            request = request.header("x-list-iter", iter);
        }

        let resp = self.execute("list_objects", request).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ListResult {
                files: Vec::new(),
                iter: String::new(),
            });
        }
        let resp = common::ensure_success(PROVIDER, "list_objects", resp).await?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| OssError::from_provider(e, PROVIDER, "list_objects"))?;

        serde_json::from_slice(&body).map_err(|e| OssError::decode(PROVIDER, e))
    }
}

/// 目录下是否可能存在带该前缀的对象
fn folder_may_match(folder: &str, prefix: &str) -> bool {
    folder.starts_with(prefix) || prefix.starts_with(folder)
}

#[async_trait]
impl OssClient for UpyunUssClient {
    // 服务在控制台管理，视为始终存在
    async fn bucket_exist(&self) -> Result<bool, OssError> {
        Ok(true)
    }

    async fn new_bucket(&self) -> Result<(), OssError> {
        Ok(())
    }

    async fn remove_bucket(&self) -> Result<(), OssError> {
        Ok(())
    }

    async fn put_object(&self, object_name: &str, file_path: &Path) -> Result<(), OssError> {
        let data = common::read_local_file(file_path).await?;
        let request = self.request(Method::PUT, object_name).body(data);
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

    // 从前缀所在目录开始逐层遍历，结果按 key 排序后丢弃 <= start_after 的部分
    async fn list_objects(
        &self,
        prefix: &str,
        start_after: &str,
    ) -> Result<Vec<ObjectInfo>, OssError> {
        let root = match prefix.rfind('/') {
            Some(idx) => &prefix[..=idx],
            None => "",
        };

        let mut objects = Vec::new();
        let mut folders = VecDeque::from([root.to_string()]);

        while let Some(dir) = folders.pop_front() {
            let mut iter = String::new();
            loop {
                let page = self.list_dir_page(&dir, &iter).await?;

                for file in page.files {
                    let key = format!("{}{}", dir, file.name);
                    if file.is_folder() {
                        let folder = format!("{}/", key);
                        if folder_may_match(&folder, prefix) {
                            folders.push_back(folder);
                        }
                    } else if key.starts_with(prefix) {
                        objects.push(ObjectInfo {
                            key,
                            size: file.length,
                            last_modified: chrono::DateTime::from_timestamp(file.last_modified, 0)
                                .unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                }

                if page.iter.is_empty() || page.iter == LIST_ITER_EOF {
                    break;
                }
                iter = page.iter;
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        objects.retain(|o| start_after.is_empty() || o.key.as_str() > start_after);
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
        let resp = self
            .execute("object_exist", self.request(Method::HEAD, object_name))
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        common::ensure_success(PROVIDER, "object_exist", resp).await?;
        Ok(true)
    }
}

impl TryFrom<UpyunUssClientConfig> for UpyunUssClient {
    type Error = OssError;

    fn try_from(config: UpyunUssClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Box<UpyunUssClient>> for Box<dyn OssClient> {
    fn from(client: Box<UpyunUssClient>) -> Self {
        client as Box<dyn OssClient>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::Server) -> UpyunUssClient {
        UpyunUssClient::new(UpyunUssClientConfig {
            operator: "op".to_string(),
            password: "password".to_string(),
            bucket: "test-bucket".to_string(),
            endpoint: server.url(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    fn file(name: &str) -> serde_json::Value {
        json!({"name": name, "type": "text/plain", "length": 5, "last_modified": 1558695400})
    }

    fn folder(name: &str) -> serde_json::Value {
        json!({"name": name, "type": "folder", "length": 0, "last_modified": 1558695400})
    }

    #[test]
    fn test_folder_may_match() {
        assert!(folder_may_match("a/", ""));
        assert!(folder_may_match("a/", "a/b"));
        assert!(folder_may_match("a/b/", "a/"));
        assert!(!folder_may_match("c/", "a/"));
    }

    #[test]
    fn test_authorization_uses_password_md5() {
        let client = UpyunUssClient::new(UpyunUssClientConfig {
            operator: "op".to_string(),
            password: "password".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.password_md5, "5f4dcc3b5aa765d61d8327deb882cf99");

        let date = "Fri, 24 May 2019 10:56:40 GMT";
        let expected = common::base64_hmac_sha1(
            b"5f4dcc3b5aa765d61d8327deb882cf99",
            format!("GET&/test-bucket/a.txt&{}", date).as_bytes(),
        );
        assert_eq!(
            client.authorization(&Method::GET, "/test-bucket/a.txt", date),
            format!("UPYUN op:{}", expected)
        );
    }

    #[tokio::test]
    async fn test_bucket_ops_are_noops() {
        // 不发出任何请求
        let client = UpyunUssClient::new(UpyunUssClientConfig::default()).unwrap();
        assert!(client.bucket_exist().await.unwrap());
        client.new_bucket().await.unwrap();
        client.remove_bucket().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_objects_walks_folders_and_pages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/test-bucket/")
            .match_header("x-list-iter", Matcher::Missing)
            .with_status(200)
            .with_body(json!({"files": [file("z.txt"), folder("a")], "iter": "page2"}).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/test-bucket/")
            .match_header("x-list-iter", "page2")
            .with_status(200)
            .with_body(json!({"files": [folder("c")], "iter": LIST_ITER_EOF}).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/test-bucket/a/")
            .with_status(200)
            .with_body(json!({"files": [file("2.txt"), file("1.txt")], "iter": LIST_ITER_EOF}).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/test-bucket/c/")
            .with_status(200)
            .with_body(json!({"files": [file("3.txt")], "iter": LIST_ITER_EOF}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);

        let all = client.list_objects("", "").await.unwrap();
        let keys: Vec<_> = all.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/1.txt", "a/2.txt", "c/3.txt", "z.txt"]);
        assert_eq!(all[0].size, 5);
        assert_eq!(all[0].last_modified.timestamp(), 1558695400);

        let after = client.list_objects("", "a/2.txt").await.unwrap();
        let keys: Vec<_> = after.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["c/3.txt", "z.txt"]);
    }

    #[tokio::test]
    async fn test_list_objects_with_prefix_starts_in_its_folder() {
        let mut server = mockito::Server::new_async().await;
        let folder_mock = server
            .mock("GET", "/test-bucket/a/")
            .with_status(200)
            .with_body(json!({"files": [file("1.txt"), file("2.txt"), file("x.txt")], "iter": LIST_ITER_EOF}).to_string())
            .create_async()
            .await;

        let objects = client_for(&server).list_objects("a/", "").await.unwrap();
        folder_mock.assert_async().await;
        assert_eq!(objects.len(), 3);
    }

    #[tokio::test]
    async fn test_object_exist() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/test-bucket/a/b.txt")
            .match_header("authorization", Matcher::Regex("^UPYUN op:".to_string()))
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
}
