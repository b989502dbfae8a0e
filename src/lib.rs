//! ossx - 多厂商对象存储客户端
//!
//! ## 模块
//!
//! - **oss**: 统一的对象存储接口，支持阿里云、百度、华为、MinIO、七牛、腾讯、又拍云和 S3
//! - **fs**: 目录监听，按事件类型分发回调
//! - **cfg**: `{type, options}` 配置解析与 trait 注册表

pub mod cfg;
pub mod fs;
pub mod oss;

// 重新导出主要的公共 API
pub use cfg::TypeOptions;

pub use fs::{Event, FileWatch, Op, Watch, WatchOptions};

pub use oss::{new_client, new_client_from_options, register_client, register_clients};
pub use oss::{ObjectInfo, OssClient, OssError, Provider};
pub use oss::{ProbeErrorPolicy, Template, UploadOutcome};
