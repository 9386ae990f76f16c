//! JBD 日志核心
//!
//! 与 Linux ext3/ext4 位兼容的元数据日志：事务生命周期、提交序列
//! 化、检查点推进和三趟崩溃恢复。
//!
//! # 架构概述
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 宿主文件系统（调用方）                      │
//! └───────────────────────┬──────────────────────────────────┘
//!                         │ new_trans / get_access /
//!                         │ set_block_dirty / submit / commit
//!                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Journal Core                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐   │
//! │  │  JbdJournal  │  │   JbdTrans   │  │    JbdBuf    │   │
//! │  │  (会话管理)   │  │    (事务)    │  │  (缓冲记录)   │   │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘   │
//! │         └──────────────────┴──────────────────┘          │
//! │                            │                             │
//! │                     ┌──────▼───────┐                     │
//! │                     │    JbdFs     │                     │
//! │                     │ (journal 载体)│                     │
//! │                     └──────┬───────┘                     │
//! └────────────────────────────┼─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              BlockCache / BlockDev / InodeBlockMap        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # 核心组件
//!
//! - [`types`] - JBD 磁盘格式（superblock、块头、撤销头）
//! - [`tags`] - 描述符标签编解码与迭代
//! - [`JbdFs`] - journal inode 载体：mount/unmount、块映射、恢复入口
//! - [`JbdJournal`] - 日志会话：环形指针、队列、块记录索引
//! - [`JbdTrans`] - 单个事务
//!
//! # 提交数据流
//!
//! 事务（缓冲的修改）-> 描述符块 + 数据副本 + 撤销块 + 提交块追加
//! 到日志头部（`journal.last`）-> 缓冲区钉在检查点队列上 -> 缓存
//! flush 触发原位写 -> 写完成推进 `journal.start`，回收日志空间。

pub mod tags;
pub mod types;

mod checkpoint;
mod commit;
mod jbd_buf;
mod jbd_fs;
mod jbd_journal;
mod jbd_trans;
mod recovery;

pub use jbd_buf::JbdBuf;
pub use jbd_fs::JbdFs;
pub use jbd_journal::JbdJournal;
pub use jbd_trans::{JbdBlockRec, JbdRevokeRec, JbdTrans};
pub use tags::{extract_block_tag, tag_bytes, write_block_tag, TagInfo, TagIter};
pub use types::*;

/// 环形日志区间 `[first, maxlen)` 上的算术
///
/// 日志指针一律经由这里回绕，避免各处手写模运算。
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogRing {
    first: u32,
    maxlen: u32,
}

impl LogRing {
    pub(crate) fn new(first: u32, maxlen: u32) -> Self {
        Self { first, maxlen }
    }

    /// 把越过 `maxlen` 的块号绕回日志区
    pub(crate) fn wrap(&self, block: u32) -> u32 {
        if block >= self.maxlen {
            block - (self.maxlen - self.first)
        } else {
            block
        }
    }

    /// 前进一个块
    pub(crate) fn next(&self, block: u32) -> u32 {
        self.wrap(block + 1)
    }

    /// 前进 `count` 个块
    pub(crate) fn advance(&self, block: u32, count: u32) -> u32 {
        self.wrap(block + count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wraps_at_maxlen() {
        let ring = LogRing::new(1, 16);

        assert_eq!(ring.next(10), 11);
        assert_eq!(ring.next(15), 1);
        assert_eq!(ring.advance(13, 5), 3);
        assert_eq!(ring.wrap(16), 1);
        assert_eq!(ring.wrap(15), 15);
    }

    #[test]
    fn test_ring_nonzero_first() {
        let ring = LogRing::new(50, 150);

        assert_eq!(ring.next(149), 50);
        assert_eq!(ring.advance(148, 4), 52);
    }
}
