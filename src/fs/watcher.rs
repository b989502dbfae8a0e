//! 目录监听器
//!
//! 监听目录下的文件系统事件，按事件类型分发给 `FileWatch` 回调

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use crate::fs::event::{Event, Op};

/// 目录监听回调，调用方必须实现此接口
///
/// 回调在监听线程中同步执行，耗时操作会阻塞该目录后续事件的处理
pub trait FileWatch: Send + Sync {
    /// 目录注册完成、监听线程启动之前调用，返回错误会取消该目录的注册
    fn init_callback(&self, dir: &Path) -> Result<()>;

    fn create_callback(&self, event: Event);

    fn write_callback(&self, event: Event);

    fn remove_callback(&self, event: Event);

    fn rename_callback(&self, event: Event);

    fn chmod_callback(&self, event: Event);

    /// 其余事件，包括访问类事件：写入文件后关闭时通常会在 `write_callback` 之后再收到一次
    fn other_callback(&self, event: Event);
}

/// 监听选项
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchOptions {
    /// 注册目录时同时监听其下已存在的全部子目录
    pub walk_existing: bool,
}

type Message = std::result::Result<Event, String>;

// notify 回调按根目录把事件路由到对应的监听线程
struct Route {
    root: PathBuf,
    tx: Sender<Message>,
}

struct Listener {
    stop_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    watched: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Listener {
    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            // 在回调中取消自身时不能 join 自己
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// 目录监听器
///
/// 所有根目录共享一个底层 notify watcher，每个根目录一个监听线程。
/// 监听是非递归的：新建的子目录在 Create 事件中加入监听，
/// 删除或重命名的目录从监听集合中移除。
///
/// 监听线程在事件通道关闭或 notify 报错时记录错误并退出，不会自动恢复。
///
/// # 示例
///
/// ```no_run
/// use ossx::fs::{Event, FileWatch, Watch};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// struct Printer;
///
/// impl FileWatch for Printer {
///     fn init_callback(&self, dir: &Path) -> anyhow::Result<()> {
///         println!("watching {}", dir.display());
///         Ok(())
///     }
///     fn create_callback(&self, event: Event) { println!("{}", event) }
///     fn write_callback(&self, event: Event) { println!("{}", event) }
///     fn remove_callback(&self, event: Event) { println!("{}", event) }
///     fn rename_callback(&self, event: Event) { println!("{}", event) }
///     fn chmod_callback(&self, event: Event) { println!("{}", event) }
///     fn other_callback(&self, event: Event) { println!("{}", event) }
/// }
///
/// let watch = Watch::new(Arc::new(Printer), &["/tmp/data"]).unwrap();
/// // ...
/// watch.stop();
/// ```
pub struct Watch {
    watcher: Arc<Mutex<RecommendedWatcher>>,
    routes: Arc<RwLock<Vec<Route>>>,
    listeners: Mutex<HashMap<PathBuf, Listener>>,
    options: WatchOptions,
}

impl Watch {
    /// 创建监听器并注册全部目录，任一目录注册失败即返回错误
    pub fn new<P: AsRef<Path>>(callback: Arc<dyn FileWatch>, dirs: &[P]) -> Result<Self> {
        Self::with_options(WatchOptions::default(), callback, dirs)
    }

    pub fn with_options<P: AsRef<Path>>(
        options: WatchOptions,
        callback: Arc<dyn FileWatch>,
        dirs: &[P],
    ) -> Result<Self> {
        let routes: Arc<RwLock<Vec<Route>>> = Arc::new(RwLock::new(Vec::new()));

        let handler_routes = routes.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let routes = match handler_routes.read() {
                Ok(routes) => routes,
                Err(_) => return,
            };
            match res {
                Ok(event) => {
                    for ev in Event::from_notify(&event) {
                        if let Some(route) = route_for(&routes, &ev.path) {
                            let _ = route.tx.send(Ok(ev));
                        }
                    }
                }
                Err(e) => {
                    for route in routes.iter() {
                        let _ = route.tx.send(Err(e.to_string()));
                    }
                }
            }
        })
        .context("创建 notify watcher 失败")?;

        let watch = Self {
            watcher: Arc::new(Mutex::new(watcher)),
            routes,
            listeners: Mutex::new(HashMap::new()),
            options,
        };

        for dir in dirs {
            watch.watch_dir(dir, callback.clone())?;
        }

        Ok(watch)
    }

    /// 注册一个根目录
    ///
    /// 先加入监听并调用 `init_callback`，成功后启动该目录的监听线程
    pub fn watch_dir(&self, dir: impl AsRef<Path>, callback: Arc<dyn FileWatch>) -> Result<()> {
        let dir = dir.as_ref();
        let root = dunce::canonicalize(dir)
            .with_context(|| format!("无法解析目录: {}", dir.display()))?;
        if !root.is_dir() {
            return Err(anyhow!("路径不是一个目录: {}", root.display()));
        }
        if self.lock_listeners()?.contains_key(&root) {
            return Err(anyhow!("目录已在监听中: {}", root.display()));
        }

        // 先注册路由，保证加入监听后的事件不会丢失
        let (events_tx, events_rx) = unbounded();
        self.routes
            .write()
            .map_err(|_| anyhow!("获取路由锁失败"))?
            .push(Route {
                root: root.clone(),
                tx: events_tx,
            });

        let watched = Arc::new(Mutex::new(HashSet::new()));
        if let Err(e) = self.add_watches(&root, &watched) {
            self.cleanup(&root, &watched);
            return Err(e);
        }
        log::info!("watch started: {}", root.display());

        if let Err(e) = callback.init_callback(&root) {
            self.cleanup(&root, &watched);
            return Err(e.context(format!("初始化回调失败: {}", root.display())));
        }

        let (stop_tx, stop_rx) = unbounded();
        let handle = {
            let root = root.clone();
            let watcher = self.watcher.clone();
            let watched = watched.clone();
            thread::Builder::new()
                .name(format!("watch-{}", root.display()))
                .spawn(move || listen(root, events_rx, stop_rx, callback, watcher, watched))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.cleanup(&root, &watched);
                return Err(anyhow!("启动监听线程失败: {}", e));
            }
        };

        self.lock_listeners()?.insert(
            root,
            Listener {
                stop_tx,
                handle: Some(handle),
                watched,
            },
        );

        Ok(())
    }

    /// 取消一个根目录的监听，停止其监听线程
    pub fn unwatch(&self, dir: impl AsRef<Path>) -> Result<()> {
        let root = dunce::canonicalize(dir.as_ref()).unwrap_or_else(|_| dir.as_ref().to_path_buf());
        let mut listener = self
            .lock_listeners()?
            .remove(&root)
            .ok_or_else(|| anyhow!("目录未在监听中: {}", root.display()))?;

        listener.stop();
        self.cleanup(&root, &listener.watched);
        log::info!("watch stopped: {}", root.display());
        Ok(())
    }

    /// 停止全部监听
    pub fn stop(&self) {
        let listeners: Vec<(PathBuf, Listener)> = match self.listeners.lock() {
            Ok(mut listeners) => listeners.drain().collect(),
            Err(_) => return,
        };

        for (root, mut listener) in listeners {
            listener.stop();
            self.cleanup(&root, &listener.watched);
            log::info!("watch stopped: {}", root.display());
        }
    }

    /// 已注册的根目录
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .listeners
            .lock()
            .map(|listeners| listeners.keys().cloned().collect())
            .unwrap_or_default();
        roots.sort();
        roots
    }

    /// 某个根目录下当前被监听的全部路径（含根目录本身）
    pub fn watched_paths(&self, dir: impl AsRef<Path>) -> Vec<PathBuf> {
        let root = dunce::canonicalize(dir.as_ref()).unwrap_or_else(|_| dir.as_ref().to_path_buf());
        let mut paths: Vec<PathBuf> = self
            .listeners
            .lock()
            .ok()
            .and_then(|listeners| {
                listeners
                    .get(&root)
                    .and_then(|l| l.watched.lock().ok().map(|w| w.iter().cloned().collect()))
            })
            .unwrap_or_default();
        paths.sort();
        paths
    }

    fn lock_listeners(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PathBuf, Listener>>> {
        self.listeners
            .lock()
            .map_err(|_| anyhow!("获取监听表锁失败"))
    }

    fn add_watches(&self, root: &Path, watched: &Arc<Mutex<HashSet<PathBuf>>>) -> Result<()> {
        let mut dirs = vec![root.to_path_buf()];
        if self.options.walk_existing {
            collect_subdirs(root, &mut dirs)?;
        }

        let mut watcher = self.watcher.lock().map_err(|_| anyhow!("获取 watcher 锁失败"))?;
        let mut watched = watched.lock().map_err(|_| anyhow!("获取监听集合锁失败"))?;
        for dir in dirs {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("添加监听失败: {}", dir.display()))?;
            watched.insert(dir);
        }
        Ok(())
    }

    // 移除路由并取消该根目录下的全部监听
    fn cleanup(&self, root: &Path, watched: &Arc<Mutex<HashSet<PathBuf>>>) {
        if let Ok(mut routes) = self.routes.write() {
            routes.retain(|r| r.root != root);
        }

        let paths: Vec<PathBuf> = match watched.lock() {
            Ok(mut watched) => watched.drain().collect(),
            Err(_) => return,
        };
        if let Ok(mut watcher) = self.watcher.lock() {
            for path in paths {
                if let Err(e) = watcher.unwatch(&path) {
                    log::debug!("unwatch failed: {}, {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.stop();
    }
}

fn collect_subdirs(dir: &Path, dirs: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let path = entry.path();
            dirs.push(path.clone());
            collect_subdirs(&path, dirs)?;
        }
    }
    Ok(())
}

/// 选出根目录是 path 最长前缀的路由
fn route_for<'a>(routes: &'a [Route], path: &Path) -> Option<&'a Route> {
    routes
        .iter()
        .filter(|r| path.starts_with(&r.root))
        .max_by_key(|r| r.root.components().count())
}

fn listen(
    root: PathBuf,
    events_rx: Receiver<Message>,
    stop_rx: Receiver<()>,
    callback: Arc<dyn FileWatch>,
    watcher: Arc<Mutex<RecommendedWatcher>>,
    watched: Arc<Mutex<HashSet<PathBuf>>>,
) {
    let mut detached = HashSet::new();
    loop {
        crossbeam::select! {
            recv(stop_rx) -> _ => break,
            recv(events_rx) -> msg => match msg {
                Ok(Ok(event)) => {
                    dispatch(event, callback.as_ref(), &watcher, &watched, &mut detached)
                }
                Ok(Err(e)) => {
                    log::error!("watcher error, listener stopped: {}, {}", root.display(), e);
                    break;
                }
                Err(_) => {
                    log::error!("event channel closed, listener stopped: {}", root.display());
                    break;
                }
            }
        }
    }
}

/// 分发单个事件
///
/// 被删除或移走的已监听目录会同时收到父目录的事件和自身的事件，
/// `detached` 记录已经回调过的目录，其后的重复事件被丢弃
fn dispatch(
    event: Event,
    callback: &dyn FileWatch,
    watcher: &Mutex<RecommendedWatcher>,
    watched: &Mutex<HashSet<PathBuf>>,
    detached: &mut HashSet<PathBuf>,
) {
    log::debug!("file event: {}", event);

    match event.op {
        Op::Create => {
            detached.remove(&event.path);
            if event.path.is_dir() {
                add_watch(&event.path, watcher, watched);
            }
            callback.create_callback(event);
        }
        Op::Write => callback.write_callback(event),
        Op::Remove | Op::Rename => {
            if detached.remove(&event.path) {
                log::debug!("duplicate event dropped: {}", event);
                return;
            }
            if remove_watch(&event.path, watcher, watched) {
                detached.insert(event.path.clone());
            }
            if event.op == Op::Remove {
                callback.remove_callback(event);
            } else {
                callback.rename_callback(event);
            }
        }
        Op::Chmod => callback.chmod_callback(event),
        Op::Other => callback.other_callback(event),
    }
}

fn add_watch(path: &Path, watcher: &Mutex<RecommendedWatcher>, watched: &Mutex<HashSet<PathBuf>>) {
    let result = match watcher.lock() {
        Ok(mut watcher) => watcher.watch(path, RecursiveMode::NonRecursive),
        Err(_) => return,
    };
    match result {
        Ok(()) => {
            if let Ok(mut watched) = watched.lock() {
                watched.insert(path.to_path_buf());
            }
            log::info!("watch added: {}", path.display());
        }
        Err(e) => log::error!("add watch failed: {}, {}", path.display(), e),
    }
}

// 只处理监听集合中的路径，目录被删除时内核可能已自动移除监听。返回是否移除
fn remove_watch(
    path: &Path,
    watcher: &Mutex<RecommendedWatcher>,
    watched: &Mutex<HashSet<PathBuf>>,
) -> bool {
    let removed = watched
        .lock()
        .map(|mut watched| watched.remove(path))
        .unwrap_or(false);
    if !removed {
        return false;
    }

    if let Ok(mut watcher) = watcher.lock() {
        if let Err(e) = watcher.unwatch(path) {
            log::debug!("unwatch failed: {}, {}", path.display(), e);
        }
    }
    log::info!("watch removed: {}", path.display());
    true
}
