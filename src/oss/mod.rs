mod client;
mod common;
mod error;
mod object_info;
mod provider;
mod upload;

mod aliyun_oss_client;
mod aws_s3_client;
mod baidu_bos_client;
mod huawei_obs_client;
mod minio_client;
mod qiniu_kodo_client;
mod tencent_cos_client;
mod upyun_uss_client;

pub use client::OssClient;
pub use error::OssError;
pub use object_info::ObjectInfo;
pub use provider::Provider;
pub use upload::{ProbeErrorPolicy, Template, UploadOutcome};

pub use aliyun_oss_client::{AliyunOssClient, AliyunOssClientConfig};
pub use aws_s3_client::{AwsS3Client, AwsS3ClientConfig};
pub use baidu_bos_client::{BaiduBosClient, BaiduBosClientConfig};
pub use huawei_obs_client::{HuaweiObsClient, HuaweiObsClientConfig};
pub use minio_client::{MinioClient, MinioClientConfig};
pub use qiniu_kodo_client::{QiniuKodoClient, QiniuKodoClientConfig};
pub use tencent_cos_client::{TencentCosClient, TencentCosClientConfig};
pub use upyun_uss_client::{UpyunUssClient, UpyunUssClientConfig};

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;

use crate::cfg::{create_trait_from_type_options, is_trait_registered, register_trait, TypeOptions};

static BUILTIN_REGISTERED: OnceCell<()> = OnceCell::new();

/// 注册所有内置的 OssClient 实现
///
/// 可重复调用，只有第一次调用会真正注册。
///
/// # 示例
///
/// ```rust
/// use ossx::oss::register_clients;
///
/// register_clients().unwrap();
/// ```
pub fn register_clients() -> Result<(), OssError> {
    BUILTIN_REGISTERED
        .get_or_try_init(|| {
            register_client::<AliyunOssClient, AliyunOssClientConfig>(Provider::Aliyun.as_str())?;
            register_client::<BaiduBosClient, BaiduBosClientConfig>(Provider::Baidu.as_str())?;
            register_client::<HuaweiObsClient, HuaweiObsClientConfig>(Provider::Huawei.as_str())?;
            register_client::<MinioClient, MinioClientConfig>(Provider::Minio.as_str())?;
            register_client::<QiniuKodoClient, QiniuKodoClientConfig>(Provider::Qiniu.as_str())?;
            register_client::<TencentCosClient, TencentCosClientConfig>(Provider::Tencent.as_str())?;
            register_client::<UpyunUssClient, UpyunUssClientConfig>(Provider::Upyun.as_str())?;
            register_client::<AwsS3Client, AwsS3ClientConfig>(Provider::S3.as_str())?;
            Ok(())
        })
        .map(|_| ())
}

/// 注册自定义的 OssClient 实现，同名注册会覆盖之前的实现
pub fn register_client<T, Config>(type_name: &str) -> Result<(), OssError>
where
    T: OssClient + TryFrom<Config, Error = OssError> + 'static,
    Config: DeserializeOwned + Send + Sync + 'static,
    Box<T>: Into<Box<dyn OssClient>>,
{
    register_trait::<T, dyn OssClient, Config>(type_name)
        .map_err(|e| OssError::Configuration(format!("注册 {} 失败: {}", type_name, e)))
}

/// 按厂商标识创建客户端，使用默认（空）配置
///
/// 未注册的标识返回 `OssError::UnknownProvider`
pub fn new_client(provider: &str) -> Result<Box<dyn OssClient>, OssError> {
    new_client_from_options(&TypeOptions::new(provider))
}

/// 根据 `{type, options}` 配置创建客户端
///
/// # 示例
///
/// ```rust
/// use ossx::cfg::TypeOptions;
/// use ossx::oss::new_client_from_options;
///
/// let options = TypeOptions::from_json(r#"{
///     type: "tencent",
///     options: {
///         bucket_url: "examplebucket-1250000000.cos.ap-guangzhou.myqcloud.com",
///         secret_id: "AKIDEXAMPLE",
///         secret_key: "secret",
///         timeout: "30s",
///     }
/// }"#).unwrap();
///
/// let client = new_client_from_options(&options).unwrap();
/// ```
pub fn new_client_from_options(options: &TypeOptions) -> Result<Box<dyn OssClient>, OssError> {
    register_clients()?;

    if !is_trait_registered::<dyn OssClient>(&options.type_name) {
        return Err(OssError::UnknownProvider(options.type_name.clone()));
    }

    create_trait_from_type_options::<dyn OssClient>(options).map_err(|e| {
        match e.downcast::<OssError>() {
            Ok(err) => err,
            Err(e) => OssError::Configuration(format!("{:#}", e)),
        }
    })
}
