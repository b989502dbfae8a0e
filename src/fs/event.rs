use notify::event::{EventKind, ModifyKind};
use std::fmt;
use std::path::PathBuf;

/// 文件事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Write,
    Remove,
    Rename,
    /// 权限或其他元数据变化
    Chmod,
    Other,
}

impl Op {
    pub fn from_kind(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => Op::Create,
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => Op::Write,
            EventKind::Modify(ModifyKind::Name(_)) => Op::Rename,
            EventKind::Modify(ModifyKind::Metadata(_)) => Op::Chmod,
            EventKind::Remove(_) => Op::Remove,
            _ => Op::Other,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Create => "CREATE",
            Op::Write => "WRITE",
            Op::Remove => "REMOVE",
            Op::Rename => "RENAME",
            Op::Chmod => "CHMOD",
            Op::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// 单个路径上的文件事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub path: PathBuf,
    pub op: Op,
}

impl Event {
    pub fn new(path: impl Into<PathBuf>, op: Op) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }

    /// notify 的一个事件可能携带多个路径（如重命名），每个路径拆成一个 Event
    pub fn from_notify(event: &notify::Event) -> Vec<Event> {
        let op = Op::from_kind(&event.kind);
        event
            .paths
            .iter()
            .map(|path| Event::new(path.clone(), op))
            .collect()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{
        AccessKind, AccessMode, CreateKind, DataChange, MetadataKind, ModifyKind, RemoveKind,
        RenameMode,
    };

    #[test]
    fn test_op_from_kind() {
        let cases = [
            (EventKind::Create(CreateKind::Folder), Op::Create),
            (EventKind::Create(CreateKind::File), Op::Create),
            (EventKind::Modify(ModifyKind::Data(DataChange::Content)), Op::Write),
            (EventKind::Modify(ModifyKind::Any), Op::Write),
            (EventKind::Modify(ModifyKind::Name(RenameMode::From)), Op::Rename),
            (EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), Op::Chmod),
            (EventKind::Remove(RemoveKind::Folder), Op::Remove),
            (EventKind::Access(AccessKind::Any), Op::Other),
            // 写入后关闭文件
            (EventKind::Access(AccessKind::Close(AccessMode::Write)), Op::Other),
            (EventKind::Any, Op::Other),
        ];

        for (kind, op) in cases {
            assert_eq!(Op::from_kind(&kind), op, "{:?}", kind);
        }
    }

    #[test]
    fn test_from_notify_splits_paths() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/tmp/a.txt"))
            .add_path(PathBuf::from("/tmp/b.txt"));

        let events = Event::from_notify(&event);
        assert_eq!(
            events,
            vec![
                Event::new("/tmp/a.txt", Op::Rename),
                Event::new("/tmp/b.txt", Op::Rename),
            ]
        );
        assert_eq!(events[0].to_string(), "RENAME /tmp/a.txt");
    }
}
