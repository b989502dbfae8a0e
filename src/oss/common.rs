// 各 REST 适配器共用的签名、HTTP 与本地文件工具

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use garde::Validate;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::oss::OssError;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

pub(crate) fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub(crate) fn base64_hmac_sha1(key: &[u8], data: &[u8]) -> String {
    BASE64.encode(hmac_sha1(key, data))
}

/// RFC 1123 格式的 GMT 时间，用于 Date 头
pub(crate) fn gmt_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// 解析厂商返回的时间，无法解析时返回 Unix 纪元
pub(crate) fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// 去掉 ETag 两侧的引号
pub(crate) fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// 逐段编码对象名，保留路径分隔符
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 补全端点的协议头；已带 http:// 或 https:// 的端点原样使用
pub(crate) fn endpoint_url(endpoint: &str, use_ssl: bool) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}

/// 去掉协议头，得到 host[:port]
pub(crate) fn endpoint_host(endpoint: &str) -> String {
    endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

pub(crate) fn validate<C: Validate<Context = ()>>(config: &C) -> Result<(), OssError> {
    config
        .validate()
        .map_err(|errors| OssError::Configuration(format!("{}", errors)))
}

pub(crate) fn http_client(provider: &str, timeout: Duration) -> Result<reqwest::Client, OssError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| OssError::from_provider(e, provider, "创建 HTTP 客户端失败"))
}

/// 发送请求，超时转换为 `OssError::Timeout`
pub(crate) async fn send(
    provider: &str,
    operation: &str,
    timeout: Duration,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, OssError> {
    request.send().await.map_err(|e| {
        if e.is_timeout() {
            OssError::Timeout {
                provider: provider.to_string(),
                operation: operation.to_string(),
                timeout,
            }
        } else {
            OssError::from_provider(e, provider, operation)
        }
    })
}

/// 非 2xx 响应转换为错误
pub(crate) async fn ensure_success(
    provider: &str,
    operation: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, OssError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(OssError::from_response(provider, operation, resp).await)
    }
}

/// 为 SDK 调用加上超时
pub(crate) async fn with_timeout<T, F>(
    provider: &str,
    operation: &str,
    timeout: Duration,
    fut: F,
) -> Result<T, OssError>
where
    F: Future<Output = Result<T, OssError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| OssError::Timeout {
            provider: provider.to_string(),
            operation: operation.to_string(),
            timeout,
        })?
}

pub(crate) async fn read_local_file(file_path: &Path) -> Result<Vec<u8>, OssError> {
    Ok(tokio::fs::read(file_path).await?)
}

/// 写入本地文件（创建或截断），不创建父目录
pub(crate) async fn write_local_file(file_path: &Path, data: &[u8]) -> Result<(), OssError> {
    let mut file = tokio::fs::File::create(file_path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

/// 将响应体分块写入本地文件，中途失败时删除已写入的部分
pub(crate) async fn save_response(
    provider: &str,
    operation: &str,
    resp: reqwest::Response,
    file_path: &Path,
) -> Result<(), OssError> {
    let file = tokio::fs::File::create(file_path).await?;
    let result = copy_body(provider, operation, resp, file).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(file_path).await {
            log::warn!("remove partial file failed: {}, {}", file_path.display(), e);
        }
    }
    result
}

async fn copy_body(
    provider: &str,
    operation: &str,
    mut resp: reqwest::Response,
    mut file: tokio::fs::File,
) -> Result<(), OssError> {
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| OssError::from_provider(e, provider, operation))?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key_keeps_slashes() {
        assert_eq!(encode_key("a/b.txt"), "a/b.txt");
        assert_eq!(encode_key("dir name/文件.txt"), "dir%20name/%E6%96%87%E4%BB%B6.txt");
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("bj.bcebos.com", true), "https://bj.bcebos.com");
        assert_eq!(endpoint_url("127.0.0.1:9000", false), "http://127.0.0.1:9000");
        assert_eq!(endpoint_url("http://127.0.0.1:1234/", true), "http://127.0.0.1:1234");
        assert_eq!(endpoint_host("https://bj.bcebos.com/"), "bj.bcebos.com");
    }

    #[test]
    fn test_parse_time() {
        let t = parse_time("2019-05-24T10:56:40.000Z");
        assert_eq!(t.timestamp(), 1558695400);
        assert_eq!(parse_time("Fri, 24 May 2019 10:56:40 GMT").timestamp(), 1558695400);
        assert_eq!(parse_time("not a time"), DateTime::<Utc>::default());
    }

    #[test]
    fn test_hmac_sha1_known_vector() {
        // RFC 2202 test case 2
        let mac = hmac_sha1(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(hex::encode(mac), "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[tokio::test]
    async fn test_local_file_roundtrip() -> Result<(), OssError> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("hello.txt");

        write_local_file(&path, b"hello").await?;
        assert_eq!(read_local_file(&path).await?, b"hello");

        let missing_parent = dir.path().join("no-such-dir").join("out.txt");
        assert!(write_local_file(&missing_parent, b"x").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_response_removes_partial_file() -> Result<(), OssError> {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                // 声明 100 字节，只发送 5 字节后断开
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello")
                    .await;
            }
        });

        let resp = reqwest::get(format!("http://{}/a/b.txt", addr)).await.unwrap();
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("out.txt");

        let result = save_response("test", "get_object", resp, &path).await;
        assert!(result.is_err());
        assert!(!path.exists());
        Ok(())
    }
}
