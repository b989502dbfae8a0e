//! cfg 模块 - 配置管理
//!
//! 提供 `{ type, options }` 形式的配置描述、按 Trait 划分的构造注册表，
//! 以及人类可读的时长格式

pub mod registry;
pub mod serde_duration;
pub mod type_options;

pub use registry::{
    create_trait_from_type_options, is_trait_registered, register_trait, registered_trait_names,
};
pub use serde_duration::HumanDur;
pub use type_options::TypeOptions;
