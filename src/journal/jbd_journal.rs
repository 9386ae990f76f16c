//! JBD Journal 管理器
//!
//! 日志会话本体：环形日志指针、事务队列、检查点队列和全局块记录
//! 索引。提交与检查点的具体流程见 `commit.rs` 与 `checkpoint.rs`。

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use log::warn;

use super::checkpoint;
use super::commit;
use super::jbd_buf::JbdBuf;
use super::jbd_fs::JbdFs;
use super::jbd_trans::{JbdBlockRec, JbdTrans};
use super::LogRing;
use crate::block::{BlockDev, BlockDevice};
use crate::cache::EndWrite;
use crate::consts::EXT4_FINCOM_RECOVER;
use crate::error::Result;
use crate::fs::{ExtSuperblock, InodeBlockMap};

/// JBD Journal（日志会话）
///
/// # 环形日志
///
/// 日志占据 journal inode 内 `[first, maxlen)` 的块区间，`start` 与
/// `last` 在其上环形推进：`last` 为写入端（提交追加处），`start` 为
/// 回收端（最老的未检查点事务起点）。`start == last` 表示日志为空。
///
/// # 队列
///
/// - `trans_queue`: 已提交申请（submit）但尚未写入日志的事务
/// - `cp_queue`: 已写入日志、等待原位写回完成的事务，按 `trans_id`
///   非递减排列
/// - `block_recs`: 原位块地址 -> 持有事务，每个 LBA 至多一条
pub struct JbdJournal {
    /// 日志区第一个块号
    pub first: u32,

    /// 回收端：最老的未检查点事务的起始日志块
    pub start: u32,

    /// 写入端：下一个要分配的日志块
    pub last: u32,

    /// 最老的未检查点事务序列号
    pub trans_id: u32,

    /// 下一个要分配的事务序列号
    pub alloc_trans_id: u32,

    /// 日志块大小
    pub block_size: u32,

    pub(super) ring: LogRing,
    pub(super) next_handle: u64,
    pub(super) trans_queue: VecDeque<JbdTrans>,
    pub(super) cp_queue: VecDeque<JbdTrans>,
    pub(super) block_recs: BTreeMap<u64, JbdBlockRec>,
}

/// 把会话指针发布到 journal superblock（内存中，标脏）
pub(super) fn journal_write_sb<M>(journal: &JbdJournal, jbd_fs: &mut JbdFs<M>) {
    jbd_fs.set_start(journal.start);
    jbd_fs.set_sequence(journal.trans_id);
}

impl JbdJournal {
    /// 开始一个日志会话
    ///
    /// 在文件系统 superblock 上置 RECOVER 标志并持久化（表示此后
    /// 崩溃需要重放日志），随后把会话指针重置到日志区起点并写出
    /// journal superblock。
    pub fn start<D: BlockDevice, M: InodeBlockMap<D>>(
        jbd_fs: &mut JbdFs<M>,
        bdev: &mut BlockDev<D>,
        fs_sb: &mut ExtSuperblock,
    ) -> Result<Self> {
        let features = fs_sb.features_incompatible() | EXT4_FINCOM_RECOVER;
        fs_sb.set_features_incompatible(features);
        fs_sb.write(bdev)?;

        let first = jbd_fs.first();
        let journal = Self {
            first,
            start: first,
            last: first,
            trans_id: 1,
            alloc_trans_id: 1,
            block_size: jbd_fs.block_size(),
            ring: LogRing::new(first, jbd_fs.max_len()),
            next_handle: 1,
            trans_queue: VecDeque::new(),
            cp_queue: VecDeque::new(),
            block_recs: BTreeMap::new(),
        };

        journal_write_sb(&journal, jbd_fs);
        jbd_fs.write_sb(bdev)?;
        Ok(journal)
    }

    /// 结束日志会话
    ///
    /// 提交所有排队事务并驱动全部检查点完成，然后清除文件系统
    /// RECOVER 标志、把 journal superblock 的 `start` 与序列号清零
    /// 并持久化——此后日志为干净状态。
    pub fn stop<D: BlockDevice, M: InodeBlockMap<D>>(
        &mut self,
        jbd_fs: &mut JbdFs<M>,
        bdev: &mut BlockDev<D>,
        fs_sb: &mut ExtSuperblock,
    ) -> Result<()> {
        self.commit_all(jbd_fs, bdev)?;
        checkpoint::flush_all_trans(self, jbd_fs, bdev)?;

        // 本会话不应再有存活的块记录
        if !self.block_recs.is_empty() {
            warn!(
                "journal stop: {} block records still alive",
                self.block_recs.len()
            );
        }

        let features = fs_sb.features_incompatible() & !EXT4_FINCOM_RECOVER;
        fs_sb.set_features_incompatible(features);
        fs_sb.write(bdev)?;

        self.start = 0;
        self.trans_id = 0;
        journal_write_sb(self, jbd_fs);
        jbd_fs.write_sb(bdev)
    }

    /// 分配一个新事务
    ///
    /// 磁盘序列号在提交时才分配；此处只分配会话句柄。
    pub fn new_trans(&mut self) -> JbdTrans {
        let handle = self.next_handle;
        self.next_handle += 1;
        JbdTrans::new(handle)
    }

    /// 把事务排入提交队列
    pub fn submit_trans(&mut self, trans: JbdTrans) {
        self.trans_queue.push_back(trans);
    }

    /// 提交队列头部的一个事务
    pub fn commit_one<D: BlockDevice, M: InodeBlockMap<D>>(
        &mut self,
        jbd_fs: &mut JbdFs<M>,
        bdev: &mut BlockDev<D>,
    ) -> Result<()> {
        match self.trans_queue.pop_front() {
            Some(trans) => commit::commit_trans(self, jbd_fs, bdev, trans),
            None => Ok(()),
        }
    }

    /// 提交队列中的所有事务
    pub fn commit_all<D: BlockDevice, M: InodeBlockMap<D>>(
        &mut self,
        jbd_fs: &mut JbdFs<M>,
        bdev: &mut BlockDev<D>,
    ) -> Result<()> {
        while !self.trans_queue.is_empty() {
            self.commit_one(jbd_fs, bdev)?;
        }
        Ok(())
    }

    /// 修改一个块之前取得访问权
    ///
    /// 块仍带着**另一个**事务的未落盘修改时，先把那份修改原位
    /// 写回。这保证同一缓冲区上永远不会叠加两个未提交事务的修改。
    pub fn get_access<D: BlockDevice, M: InodeBlockMap<D>>(
        &mut self,
        jbd_fs: &mut JbdFs<M>,
        bdev: &mut BlockDev<D>,
        trans: &JbdTrans,
        lba: u64,
    ) -> Result<()> {
        if bdev.buf_is_dirty(lba) {
            if let EndWrite::Journal { trans: owner } = bdev.buf_end_write(lba) {
                if owner != trans.handle {
                    checkpoint::flush_buf(self, jbd_fs, bdev, lba)?;
                }
            }
        }
        Ok(())
    }

    /// 把块加入事务并标脏
    ///
    /// 缓冲区尚未被日志挂接时：建立（或接管）块记录、给缓冲区加
    /// 一个引用并打上本事务的写完成标记，然后标脏。已挂接的缓冲区
    /// 不重复登记。
    pub fn set_block_dirty<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        trans: &mut JbdTrans,
        lba: u64,
    ) -> Result<()> {
        use alloc::collections::btree_map::Entry;

        if bdev.buf_end_write(lba) != EndWrite::None {
            return Ok(());
        }

        match self.block_recs.entry(lba) {
            Entry::Occupied(mut e) => {
                // 旧持有者的副本必已落盘，记录转归本事务
                let rec = e.get_mut();
                debug_assert!(rec.buf.is_none());
                rec.trans = trans.handle;
            }
            Entry::Vacant(e) => {
                e.insert(JbdBlockRec {
                    lba,
                    trans: trans.handle,
                    buf: Some(lba),
                });
            }
        }

        bdev.buf_inc_ref(lba);
        bdev.buf_set_end_write(lba, EndWrite::Journal {
            trans: trans.handle,
        });
        trans.buf_queue.push_back(JbdBuf::new(lba, trans.handle));
        trans.data_cnt += 1;
        bdev.buf_set_dirty(lba);
        Ok(())
    }

    /// 尝试撤销一个块
    ///
    /// `lba` 仍被检查点队列上另一个事务持有时：若其缓冲区尚未
    /// 落盘则先写回，然后给本事务追加一条撤销记录。调用方释放
    /// 一个块、需要作废其早先日志副本时使用。
    pub fn try_revoke_block<D: BlockDevice, M: InodeBlockMap<D>>(
        &mut self,
        jbd_fs: &mut JbdFs<M>,
        bdev: &mut BlockDev<D>,
        trans: &mut JbdTrans,
        lba: u64,
    ) -> Result<()> {
        let live_buf = match self.block_recs.get(&lba) {
            Some(rec) if rec.trans != trans.handle => Some(rec.buf),
            _ => return Ok(()),
        };

        if let Some(Some(buf_lba)) = live_buf {
            checkpoint::flush_buf(self, jbd_fs, bdev, buf_lba)?;
        }

        trans.revoke_block(lba);
        Ok(())
    }

    /// 释放一个事务
    ///
    /// `abort` 时把所有缓冲区从缓存上摘下（清标记、清脏、放引用）；
    /// 两种情况都回收本事务仍持有的块记录。
    pub(super) fn free_trans<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        mut trans: JbdTrans,
        abort: bool,
    ) -> Result<()> {
        while let Some(buf) = trans.buf_queue.pop_front() {
            if abort {
                bdev.buf_set_end_write(buf.lba, EndWrite::None);
                bdev.buf_clear_dirty(buf.lba);
                bdev.buf_release(buf.lba)?;
            }
            self.remove_block_rec(trans.handle, buf.lba);
        }
        trans.revoke_list.clear();
        Ok(())
    }

    /// 块记录仍归 `handle` 所有时将其移除
    pub(super) fn remove_block_rec(&mut self, handle: u64, lba: u64) {
        if let Some(rec) = self.block_recs.get(&lba) {
            if rec.trans == handle {
                self.block_recs.remove(&lba);
            }
        }
    }

    /// 提交队列长度
    pub fn trans_queue_len(&self) -> usize {
        self.trans_queue.len()
    }

    /// 检查点队列长度
    pub fn cp_queue_len(&self) -> usize {
        self.cp_queue.len()
    }

    /// 检查点队列上的事务序列号（队首在前）
    pub fn cp_trans_ids(&self) -> Vec<u32> {
        self.cp_queue.iter().map(|t| t.trans_id).collect()
    }

    /// 检查点队列上未完成的原位写回数
    ///
    /// 对队列中每个事务求 `data_cnt - written_cnt` 之和；不少于仍挂着
    /// 日志写完成标记的缓冲区数。
    pub fn cp_pending_writes(&self) -> usize {
        self.cp_queue
            .iter()
            .map(|t| t.data_cnt - t.written_cnt)
            .sum()
    }

    /// 存活的块记录数
    pub fn block_rec_count(&self) -> usize {
        self.block_recs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_journal() -> JbdJournal {
        JbdJournal {
            first: 1,
            start: 1,
            last: 1,
            trans_id: 1,
            alloc_trans_id: 1,
            block_size: 4096,
            ring: LogRing::new(1, 16),
            next_handle: 1,
            trans_queue: VecDeque::new(),
            cp_queue: VecDeque::new(),
            block_recs: BTreeMap::new(),
        }
    }

    #[test]
    fn test_new_trans_handles_are_unique() {
        let mut journal = bare_journal();

        let t1 = journal.new_trans();
        let t2 = journal.new_trans();
        assert_ne!(t1.handle, t2.handle);
        // 磁盘序列号在提交前不分配
        assert_eq!(t1.trans_id, 0);
        assert_eq!(t2.trans_id, 0);
    }

    #[test]
    fn test_submit_queues_in_order() {
        let mut journal = bare_journal();

        let t1 = journal.new_trans();
        let t2 = journal.new_trans();
        let h1 = t1.handle;

        journal.submit_trans(t1);
        journal.submit_trans(t2);
        assert_eq!(journal.trans_queue_len(), 2);
        assert_eq!(journal.trans_queue.front().unwrap().handle, h1);
    }

    #[test]
    fn test_remove_block_rec_checks_owner() {
        let mut journal = bare_journal();
        journal.block_recs.insert(
            500,
            JbdBlockRec {
                lba: 500,
                trans: 1,
                buf: None,
            },
        );

        // 其它事务的移除请求不生效
        journal.remove_block_rec(2, 500);
        assert_eq!(journal.block_rec_count(), 1);

        journal.remove_block_rec(1, 500);
        assert_eq!(journal.block_rec_count(), 0);
    }
}
