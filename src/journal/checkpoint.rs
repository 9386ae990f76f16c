//! 检查点
//!
//! 日志副本落盘后，原位写回（检查点）允许回收日志空间。原位写
//! 都经由 flush 路径发生，每次写回产生一个写完成记录，在同一调用
//! 栈上由 [`trans_end_write`] 处理：摘下对应缓冲区、推进事务的
//! 写回计数，事务全部写完时把回收端 `journal.start` 推过它。

use alloc::vec::Vec;

use log::{debug, warn};

use super::jbd_fs::JbdFs;
use super::jbd_journal::{journal_write_sb, JbdJournal};
use super::jbd_trans::JbdTrans;
use crate::block::{BlockDev, BlockDevice};
use crate::cache::{EndWrite, WriteCompletion};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::InodeBlockMap;

/// 事务在队列中的位置
enum TransLoc {
    Cp(usize),
    Submitted(usize),
}

fn locate_trans(journal: &JbdJournal, handle: u64) -> Option<TransLoc> {
    if let Some(i) = journal.cp_queue.iter().position(|t| t.handle == handle) {
        return Some(TransLoc::Cp(i));
    }
    journal
        .trans_queue
        .iter()
        .position(|t| t.handle == handle)
        .map(TransLoc::Submitted)
}

/// 原位写回一个日志挂接的缓冲区，并处理其写完成
pub(super) fn flush_buf<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    lba: u64,
) -> Result<()> {
    if let Some(comp) = bdev.flush_lba(lba)? {
        let write_result = comp.result.clone();
        trans_end_write(journal, jbd_fs, bdev, comp)?;
        write_result?;
    }
    Ok(())
}

/// 处理一次原位写完成
///
/// 一个被日志挂接的缓冲区写回原位后：
/// 1. 从所属事务摘下对应缓冲区，`written_cnt` 加一
/// 2. 清空块记录的缓冲区指针；记录仍归该事务时回收
/// 3. 事务全部写完（`written_cnt == data_cnt`）时将其移出检查点
///    队列；若它是队首，把 `journal.start` 推过它，顺带越过后续的
///    纯撤销事务，最后持久化 journal superblock
pub(super) fn trans_end_write<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    comp: WriteCompletion,
) -> Result<()> {
    let EndWrite::Journal { trans: handle } = comp.tag else {
        return Ok(());
    };

    let Some(loc) = locate_trans(journal, handle) else {
        // 单线程契约下不可达：事务在完成送达前已被释放
        warn!("write completion for unknown transaction (lba {})", comp.lba);
        return Ok(());
    };
    let first_in_queue = matches!(loc, TransLoc::Cp(0));

    let (done, on_cp_queue, idx) = {
        let (trans, idx, on_cp) = match loc {
            TransLoc::Cp(i) => (&mut journal.cp_queue[i], i, true),
            TransLoc::Submitted(i) => (&mut journal.trans_queue[i], i, false),
        };
        if let Err(e) = &comp.result {
            trans.error = Some(e.clone());
        }
        if let Some(pos) = trans.buf_queue.iter().position(|b| b.lba == comp.lba) {
            trans.buf_queue.remove(pos);
        }
        trans.written_cnt += 1;
        (trans.written_cnt == trans.data_cnt, on_cp, idx)
    };

    if let Some(rec) = journal.block_recs.get_mut(&comp.lba) {
        rec.buf = None;
    }
    journal.remove_block_rec(handle, comp.lba);

    if !(done && on_cp_queue) {
        return Ok(());
    }

    let trans = journal.cp_queue.remove(idx).expect("located above");
    debug!(
        "checkpoint: trans {} complete ({} blocks)",
        trans.trans_id, trans.data_cnt
    );

    if first_in_queue {
        journal.start = journal.ring.advance(trans.start_iblock, trans.alloc_blocks);
        journal.trans_id = trans.trans_id + 1;
    }
    journal.free_trans(bdev, trans, false)?;

    if first_in_queue {
        // 越过队首的纯撤销事务，停在下一个数据事务上
        while let Some(head) = journal.cp_queue.front() {
            if head.data_cnt == 0 {
                let t = journal.cp_queue.pop_front().expect("peeked above");
                skip_pure_revoke(journal, jbd_fs, bdev, t)?;
            } else {
                journal.start = journal.ring.wrap(head.start_iblock);
                journal.trans_id = head.trans_id;
                break;
            }
        }
        journal_write_sb(journal, jbd_fs);
        jbd_fs.write_sb(bdev)?;
    }
    Ok(())
}

/// 回收端越过一个纯撤销事务
pub(super) fn skip_pure_revoke<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    trans: JbdTrans,
) -> Result<()> {
    journal.start = journal.ring.advance(trans.start_iblock, trans.alloc_blocks);
    journal.trans_id = trans.trans_id + 1;
    journal.free_trans(bdev, trans, false)?;
    journal_write_sb(journal, jbd_fs);
    Ok(())
}

/// 原位写回一个事务的全部缓冲区
pub(super) fn flush_trans<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    handle: u64,
) -> Result<()> {
    let lbas: Vec<u64> = journal
        .cp_queue
        .iter()
        .find(|t| t.handle == handle)
        .map(|t| t.buf_queue.iter().map(|b| b.lba).collect())
        .unwrap_or_default();

    for lba in lbas {
        flush_buf(journal, jbd_fs, bdev, lba)?;
    }
    Ok(())
}

/// 驱动所有检查点完成
///
/// 反复处理检查点队首：纯撤销事务直接越过，数据事务写回其全部
/// 缓冲区（写完成处理会把它移出队列）。日志写满时由块分配路径
/// 同步调用，也用于 `journal_stop` 收尾。
pub(super) fn flush_all_trans<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
) -> Result<()> {
    loop {
        let Some(head) = journal.cp_queue.front() else {
            break;
        };
        let (handle, data_cnt) = (head.handle, head.data_cnt);

        if data_cnt == 0 {
            let t = journal.cp_queue.pop_front().expect("peeked above");
            skip_pure_revoke(journal, jbd_fs, bdev, t)?;
        } else {
            flush_trans(journal, jbd_fs, bdev, handle)?;
            if journal.cp_queue.front().map(|t| t.handle) == Some(handle) {
                return Err(Error::new(
                    ErrorKind::InvalidState,
                    "checkpoint queue not progressing",
                ));
            }
        }
    }
    Ok(())
}
