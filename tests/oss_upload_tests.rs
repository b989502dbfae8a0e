//! 上传模板集成测试
//!
//! 通过工厂创建腾讯云 COS 客户端，指向本地 mockito 服务

use ossx::cfg::TypeOptions;
use ossx::oss::{new_client_from_options, OssError, Template, UploadOutcome};
use std::path::PathBuf;
use tempfile::TempDir;

fn cos_options(url: &str) -> TypeOptions {
    TypeOptions::from_yaml(&format!(
        r#"
type: tencent
options:
  bucket_url: {}
  secret_id: AKIDEXAMPLE
  secret_key: secret
  timeout: 5s
"#,
        url
    ))
    .unwrap()
}

fn hello_file() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hello.txt");
    std::fs::write(&path, "hello").unwrap();
    (dir, path)
}

#[tokio::test]
async fn test_upload_creates_missing_bucket() {
    let mut server = mockito::Server::new_async().await;
    let bucket_head = server
        .mock("HEAD", "/")
        .with_status(404)
        .create_async()
        .await;
    let bucket_put = server
        .mock("PUT", "/")
        .with_status(200)
        .create_async()
        .await;
    let object_head = server
        .mock("HEAD", "/a/b.txt")
        .with_status(404)
        .create_async()
        .await;
    let object_put = server
        .mock("PUT", "/a/b.txt")
        .match_body("hello")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (_dir, path) = hello_file();
    let client = new_client_from_options(&cos_options(&server.url())).unwrap();
    let outcome = Template::new(client).upload("a/b.txt", &path).await.unwrap();

    assert_eq!(outcome, UploadOutcome::Uploaded);
    bucket_head.assert_async().await;
    bucket_put.assert_async().await;
    object_head.assert_async().await;
    object_put.assert_async().await;
}

#[tokio::test]
async fn test_upload_skips_existing_object() {
    let mut server = mockito::Server::new_async().await;
    server.mock("HEAD", "/").with_status(200).create_async().await;
    server
        .mock("HEAD", "/a/b.txt")
        .with_status(200)
        .create_async()
        .await;
    let bucket_put = server
        .mock("PUT", "/")
        .expect(0)
        .create_async()
        .await;
    let object_put = server
        .mock("PUT", "/a/b.txt")
        .expect(0)
        .create_async()
        .await;

    let (_dir, path) = hello_file();
    let client = new_client_from_options(&cos_options(&server.url())).unwrap();
    let outcome = Template::new(client).upload("a/b.txt", &path).await.unwrap();

    assert_eq!(outcome, UploadOutcome::AlreadyExists);
    bucket_put.assert_async().await;
    object_put.assert_async().await;
}

#[tokio::test]
async fn test_failed_upload_is_cleaned_up_once() {
    let mut server = mockito::Server::new_async().await;
    server.mock("HEAD", "/").with_status(200).create_async().await;
    server
        .mock("HEAD", "/a/b.txt")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("PUT", "/a/b.txt")
        .with_status(500)
        .with_body("<Error><Code>InternalError</Code></Error>")
        .create_async()
        .await;
    let cleanup = server
        .mock("DELETE", "/a/b.txt")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let (_dir, path) = hello_file();
    let client = new_client_from_options(&cos_options(&server.url())).unwrap();
    let err = Template::new(client)
        .upload("a/b.txt", &path)
        .await
        .unwrap_err();

    // 返回上传错误，而不是清理错误
    match err {
        OssError::Http {
            operation, status, ..
        } => {
            assert_eq!(operation, "put_object");
            assert_eq!(status, 500);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    cleanup.assert_async().await;
}

#[tokio::test]
async fn test_upload_missing_local_file() {
    let mut server = mockito::Server::new_async().await;
    server.mock("HEAD", "/").with_status(200).create_async().await;
    server
        .mock("HEAD", "/a/b.txt")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("DELETE", "/a/b.txt")
        .with_status(204)
        .create_async()
        .await;

    let client = new_client_from_options(&cos_options(&server.url())).unwrap();
    let err = Template::new(client)
        .upload("a/b.txt", std::path::Path::new("/no/such/file/for/ossx"))
        .await
        .unwrap_err();

    assert!(matches!(err, OssError::Io(_)));
}
