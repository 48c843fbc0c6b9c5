//! 时钟源：已同步时返回墙钟，未同步时退化为“固定纪元 + 开机时长”。

use std::{
    cell::Cell,
    fs,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

/// 未同步时使用的参考纪元（2025-01-01T00:00:00Z）。
pub const FALLBACK_EPOCH_SEC: u64 = 1_735_689_600;
/// 墙钟可信下限（2016-01-01T00:00:00Z），早于此值视为 RTC 尚未校时。
pub const SYNC_FLOOR_SEC: u64 = 1_451_606_400;

/// 时间同步状态。
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synchronized,
    Unsynchronized,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synchronized => "synchronized",
            Self::Unsynchronized => "unsynchronized",
        }
    }
}

/// 一次时钟读数，区分同步与退化两种来源。
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ClockReading {
    Synchronized(u64),
    Fallback(u64),
}

impl ClockReading {
    /// unix 秒。
    pub fn unix_secs(self) -> u64 {
        match self {
            Self::Synchronized(secs) | Self::Fallback(secs) => secs,
        }
    }

    pub fn status(self) -> SyncStatus {
        match self {
            Self::Synchronized(_) => SyncStatus::Synchronized,
            Self::Fallback(_) => SyncStatus::Unsynchronized,
        }
    }
}

/// 底层时间来源：同步信号、墙钟与开机时长。实现不得阻塞。
pub trait ClockBackend {
    fn sync_status(&self) -> SyncStatus;
    fn wall_clock_secs(&self) -> u64;
    fn uptime_secs(&self) -> u64;
}

/// 时钟源。
#[derive(Debug, Clone)]
pub struct ClockSource<B> {
    backend: B,
}

impl<B: ClockBackend> ClockSource<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// 按同步状态选择读数来源。
    pub fn reading(&self) -> ClockReading {
        match self.backend.sync_status() {
            SyncStatus::Synchronized => ClockReading::Synchronized(self.backend.wall_clock_secs()),
            SyncStatus::Unsynchronized => ClockReading::Fallback(
                FALLBACK_EPOCH_SEC.saturating_add(self.backend.uptime_secs()),
            ),
        }
    }

    /// 当前 unix 秒；永不失败。
    pub fn now(&self) -> u64 {
        self.reading().unix_secs()
    }

    pub fn status(&self) -> SyncStatus {
        self.backend.sync_status()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// 开机时长来源（Linux）。
const PROC_UPTIME_PATH: &str = "/proc/uptime";

/// 系统时钟：墙钟越过可信下限即视为已同步。
///
/// 开机时长优先取主机 `/proc/uptime`；读不到时退化为本进程启动以来的时长，
/// 此时每次进程启动的退化读数都从 `FALLBACK_EPOCH_SEC` 重新开始。
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
    force_unsynced: bool,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            force_unsynced: false,
        }
    }

    /// 强制走未同步分支（诊断用途）。
    pub fn force_unsynchronized(mut self, force: bool) -> Self {
        self.force_unsynced = force;
        self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockBackend for SystemClock {
    fn sync_status(&self) -> SyncStatus {
        if !self.force_unsynced && self.wall_clock_secs() >= SYNC_FLOOR_SEC {
            SyncStatus::Synchronized
        } else {
            SyncStatus::Unsynchronized
        }
    }

    fn wall_clock_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn uptime_secs(&self) -> u64 {
        host_uptime_secs().unwrap_or_else(|| self.started.elapsed().as_secs())
    }
}

/// 读取主机开机时长（秒）。
fn host_uptime_secs() -> Option<u64> {
    let raw = fs::read_to_string(PROC_UPTIME_PATH).ok()?;
    parse_proc_uptime(&raw)
}

/// 解析 `/proc/uptime` 首字段（`"<uptime> <idle>"`，带小数），向下取整。
fn parse_proc_uptime(raw: &str) -> Option<u64> {
    let first = raw.split_whitespace().next()?;
    let whole = first.split_once('.').map_or(first, |(whole, _)| whole);
    whole.parse().ok()
}

/// 手动驱动的时钟，用于测试与可复现的 token 生成。
#[derive(Debug, Clone)]
pub struct ManualClock {
    status: Cell<SyncStatus>,
    wall: Cell<u64>,
    uptime: Cell<u64>,
}

impl ManualClock {
    /// 已同步且墙钟固定为 `wall`。
    pub fn synchronized(wall: u64) -> Self {
        Self {
            status: Cell::new(SyncStatus::Synchronized),
            wall: Cell::new(wall),
            uptime: Cell::new(0),
        }
    }

    /// 未同步，开机时长为 `uptime`。
    pub fn unsynchronized(uptime: u64) -> Self {
        Self {
            status: Cell::new(SyncStatus::Unsynchronized),
            wall: Cell::new(0),
            uptime: Cell::new(uptime),
        }
    }

    /// 模拟时间同步完成。
    pub fn sync_to(&self, wall: u64) {
        self.wall.set(wall);
        self.status.set(SyncStatus::Synchronized);
    }

    /// 墙钟与开机时长同时前进。
    pub fn advance(&self, secs: u64) {
        self.wall.set(self.wall.get().saturating_add(secs));
        self.uptime.set(self.uptime.get().saturating_add(secs));
    }
}

impl ClockBackend for ManualClock {
    fn sync_status(&self) -> SyncStatus {
        self.status.get()
    }

    fn wall_clock_secs(&self) -> u64 {
        self.wall.get()
    }

    fn uptime_secs(&self) -> u64 {
        self.uptime.get()
    }
}

impl<B: ClockBackend> ClockBackend for &B {
    fn sync_status(&self) -> SyncStatus {
        (**self).sync_status()
    }

    fn wall_clock_secs(&self) -> u64 {
        (**self).wall_clock_secs()
    }

    fn uptime_secs(&self) -> u64 {
        (**self).uptime_secs()
    }
}
