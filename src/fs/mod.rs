//! 文件系统监听模块
//!
//! 监听目录下的文件变化，按事件类型回调 `FileWatch`

mod event;
mod watcher;

pub use event::{Event, Op};
pub use watcher::{FileWatch, Watch, WatchOptions};
