//! 事务提交
//!
//! 把一个事务序列化到日志头部：描述符块 + 数据副本 + 撤销块 +
//! 提交块。所有日志块带 FLUSH 标志，释放句柄时立即写穿——保证
//! 提交块落盘前描述符与数据已经在盘上。
//!
//! 写出的描述符/提交/撤销块不含校验和（字段保持为零）；能容忍零
//! 校验和的读取方可以重放，严格校验 CSUM_V2/V3 的读取方会拒绝。

use alloc::vec;
use alloc::vec::Vec;

use log::trace;

use super::checkpoint;
use super::jbd_fs::JbdFs;
use super::jbd_journal::{journal_write_sb, JbdJournal};
use super::jbd_trans::JbdTrans;
use super::tags::{write_block_tag, TagInfo};
use super::types::*;
use crate::block::{Block, BlockDev, BlockDevice};
use crate::cache::EndWrite;
use crate::error::Result;
use crate::fs::InodeBlockMap;

/// 在日志中分配一个块
///
/// 返回 `journal.last` 并前移（环形）。写入端追上回收端时，同步
/// 驱动所有检查点完成以回收空间——日志永不溢出，调用方阻塞在
/// 检查点写回之后。
pub(super) fn alloc_block<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    trans: &mut JbdTrans,
) -> Result<u32> {
    let block = journal.last;
    journal.last = journal.ring.next(journal.last);
    trans.alloc_blocks += 1;

    if journal.last == journal.start {
        checkpoint::flush_all_trans(journal, jbd_fs, bdev)?;
    }

    Ok(block)
}

/// 把一个整块写进日志（经缓存，写穿）
fn write_journal_block<D: BlockDevice, M: InodeBlockMap<D>>(
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    iblock: u32,
    data: &[u8],
) -> Result<()> {
    let phys = jbd_fs.bmap(bdev, iblock)?;
    let mut block = Block::get_noread(bdev, phys)?;
    block.with_data_mut(|d| d.copy_from_slice(data))?;
    block.mark_flush();
    block.release()
}

/// 暂存中的描述符块
struct StagedDesc {
    iblock: u32,
    data: Vec<u8>,
    off: usize,
    /// 尚未写入第一个标签（该标签需携带 UUID）
    fresh: bool,
}

/// 写出描述符块与数据副本
///
/// 先丢弃脏位已被他处清除的缓冲区（内容已经以别的方式落盘），
/// 再按剩余缓冲区重置写回计数。描述符标签空间耗尽时另起一块。
pub(super) fn prepare<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    trans: &mut JbdTrans,
) -> Result<()> {
    // 清位缓冲区：解除挂接并放掉引用
    let mut kept = alloc::collections::VecDeque::new();
    while let Some(buf) = trans.buf_queue.pop_front() {
        if bdev.buf_is_dirty(buf.lba) {
            kept.push_back(buf);
        } else {
            trace!("commit: dropping clean buffer {}", buf.lba);
            bdev.buf_set_end_write(buf.lba, EndWrite::None);
            bdev.buf_release(buf.lba)?;
            journal.remove_block_rec(buf.trans, buf.lba);
        }
    }
    trans.buf_queue = kept;
    trans.data_cnt = trans.buf_queue.len();
    trans.written_cnt = 0;

    if trans.buf_queue.is_empty() {
        return Ok(());
    }

    let uuid = jbd_fs.sb.uuid();
    let block_size = journal.block_size as usize;
    let total = trans.buf_queue.len();
    let mut desc: Option<StagedDesc> = None;

    for i in 0..total {
        let lba = trans.buf_queue[i].lba;
        let last_tag = i == total - 1;

        loop {
            if desc.is_none() {
                let iblock = alloc_block(journal, jbd_fs, bdev, trans)?;
                let mut data = vec![0u8; block_size];
                BlockHeader::new(JBD_DESCRIPTOR_BLOCK, trans.trans_id).write_to(&mut data);
                desc = Some(StagedDesc {
                    iblock,
                    data,
                    off: JBD_BHDR_SIZE,
                    fresh: true,
                });
                if trans.start_iblock == 0 {
                    trans.start_iblock = iblock;
                }
            }

            let staged = desc.as_mut().expect("staged above");
            let tag = TagInfo::new(
                lba,
                if staged.fresh { Some(uuid) } else { None },
                last_tag,
            );

            match write_block_tag(&jbd_fs.sb, &mut staged.data[staged.off..], &tag) {
                Ok(n) => {
                    staged.off += n;
                    staged.fresh = false;
                }
                Err(_) => {
                    // 标签表满：写出当前描述符，换新块重试
                    let staged = desc.take().expect("staged above");
                    write_journal_block(jbd_fs, bdev, staged.iblock, &staged.data)?;
                    continue;
                }
            }

            // 拷贝数据块到日志
            let data_iblock = alloc_block(journal, jbd_fs, bdev, trans)?;
            trans.buf_queue[i].jbd_lba = data_iblock;
            let src = bdev.buf_data(lba)?;
            write_journal_block(jbd_fs, bdev, data_iblock, &src)?;
            break;
        }
    }

    if let Some(staged) = desc.take() {
        write_journal_block(jbd_fs, bdev, staged.iblock, &staged.data)?;
    }
    Ok(())
}

/// 写出撤销块
///
/// 撤销记录按 4 或 8 字节大端序（取决于 64BIT 特性）打包；一块
/// 写满时在头部记下已用字节数并另起一块。
pub(super) fn prepare_revoke<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    trans: &mut JbdTrans,
) -> Result<()> {
    if trans.revoke_list.is_empty() {
        return Ok(());
    }

    let record_len: usize = if jbd_fs.sb.is_64bit() { 8 } else { 4 };
    let block_size = journal.block_size as usize;
    let lbas: Vec<u64> = trans.revoke_list.iter().map(|r| r.lba).collect();

    // (iblock, 暂存内容, 写入位置)
    let mut staged: Option<(u32, Vec<u8>, usize)> = None;

    for lba in lbas {
        loop {
            if staged.is_none() {
                let iblock = alloc_block(journal, jbd_fs, bdev, trans)?;
                let mut data = vec![0u8; block_size];
                BlockHeader::new(JBD_REVOKE_BLOCK, trans.trans_id).write_to(&mut data);
                staged = Some((iblock, data, JBD_REVOKE_HEADER_SIZE));
                if trans.start_iblock == 0 {
                    trans.start_iblock = iblock;
                }
            }

            let (_, data, off) = staged.as_mut().expect("staged above");
            if block_size - *off < record_len {
                // 本块写满：记录已用字节数并写出
                let (iblock, mut data, off) = staged.take().expect("staged above");
                put_be32(&mut data, JBD_BHDR_SIZE, off as u32);
                write_journal_block(jbd_fs, bdev, iblock, &data)?;
                continue;
            }

            if record_len == 8 {
                put_be64(data, *off, lba);
            } else {
                put_be32(data, *off, lba as u32);
            }
            *off += record_len;
            break;
        }
    }

    if let Some((iblock, mut data, off)) = staged.take() {
        put_be32(&mut data, JBD_BHDR_SIZE, off as u32);
        write_journal_block(jbd_fs, bdev, iblock, &data)?;
    }
    Ok(())
}

/// 写出提交块
///
/// 提交块的存在使事务持久化；校验和字段保持为零。
fn write_commit_block<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    trans: &mut JbdTrans,
) -> Result<()> {
    let iblock = alloc_block(journal, jbd_fs, bdev, trans)?;
    let mut data = vec![0u8; journal.block_size as usize];
    BlockHeader::new(JBD_COMMIT_BLOCK, trans.trans_id).write_to(&mut data);
    write_journal_block(jbd_fs, bdev, iblock, &data)
}

/// 释放日志对事务缓冲区的引用
///
/// 提交完成后调用；此后缓存可以把这些缓冲区原位写回，写完成
/// 经由检查点路径推进 `journal.start`。
fn cp_trans<D: BlockDevice>(bdev: &mut BlockDev<D>, trans: &JbdTrans) -> Result<()> {
    for buf in &trans.buf_queue {
        bdev.buf_release(buf.lba)?;
    }
    Ok(())
}

fn commit_body<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    trans: &mut JbdTrans,
) -> Result<bool> {
    prepare(journal, jbd_fs, bdev, trans)?;
    prepare_revoke(journal, jbd_fs, bdev, trans)?;

    // 两个列表都空：不构成一个事务，直接丢弃
    if trans.buf_queue.is_empty() && trans.revoke_list.is_empty() {
        return Ok(true);
    }

    write_commit_block(journal, jbd_fs, bdev, trans)?;
    Ok(false)
}

/// 立即提交一个事务
///
/// 失败时回退 `journal.last` 并中止事务（所有缓冲区解除挂接、
/// 块记录回收）；盘上日志不受影响，失败事务占用的日志块会被下次
/// 提交覆盖。
pub(super) fn commit_trans<D: BlockDevice, M: InodeBlockMap<D>>(
    journal: &mut JbdJournal,
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    mut trans: JbdTrans,
) -> Result<()> {
    let saved_last = journal.last;
    trans.trans_id = journal.alloc_trans_id;

    match commit_body(journal, jbd_fs, bdev, &mut trans) {
        Ok(true) => {
            // 空事务：序列号不消耗
            journal.free_trans(bdev, trans, false)
        }
        Ok(false) => {
            journal.alloc_trans_id += 1;

            if journal.cp_queue.is_empty() {
                if trans.data_cnt > 0 {
                    journal.start = journal.ring.wrap(trans.start_iblock);
                    journal.trans_id = trans.trans_id;
                    journal_write_sb(journal, jbd_fs);
                    jbd_fs.write_sb(bdev)?;
                    cp_trans(bdev, &trans)?;
                    journal.cp_queue.push_back(trans);
                } else {
                    // 纯撤销事务：不进检查点队列，回收端直接越过它
                    journal.start = journal.ring.advance(trans.start_iblock, trans.alloc_blocks);
                    journal.trans_id = trans.trans_id + 1;
                    journal_write_sb(journal, jbd_fs);
                    jbd_fs.write_sb(bdev)?;
                    journal.free_trans(bdev, trans, false)?;
                }
            } else {
                if trans.data_cnt > 0 {
                    cp_trans(bdev, &trans)?;
                }
                journal.cp_queue.push_back(trans);
            }
            Ok(())
        }
        Err(e) => {
            journal.last = saved_last;
            let _ = journal.free_trans(bdev, trans, true);
            Err(e)
        }
    }
}
