/// 快照落盘策略（按版本间隔）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    #[default]
    Never,
    /// 每跨过一个 `n` 的整数倍版本写一次快照
    Every(u64),
}

impl SnapshotPolicy {
    /// 一次保存把版本从 `previous` 推进到 `current` 时是否需要写快照。
    ///
    /// 批量追加可能越过整数倍而不落在其上，因此按“是否跨过”判断。
    pub fn should_snapshot(&self, previous: u64, current: u64) -> bool {
        match self {
            SnapshotPolicy::Never => false,
            SnapshotPolicy::Every(interval) => {
                let interval = (*interval).max(1);
                current > previous && current / interval > previous / interval
            }
        }
    }
}
