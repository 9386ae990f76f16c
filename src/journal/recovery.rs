//! Journal 崩溃恢复
//!
//! 三趟遍历日志：
//!
//! 1. **SCAN** - 从 `sb.start`/`sb.sequence` 起扫描，确定日志中最后
//!    一个有效事务的序列号
//! 2. **REVOKE** - 收集所有撤销块，建立"块号 -> 撤销它的最高事务
//!    序列号"索引
//! 3. **RECOVER** - 把每个描述符块列出的日志副本写回原位；事务 T
//!    中块 B 的副本只在 B 未被撤销、或 `T >= 撤销序列号` 时应用
//!
//! 遍历在遇到 magic 不符、序列号断裂（SCAN 视作日志结束，其余两趟
//! 视作损坏）、未知块类型或绕回起点时结束。

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use log::debug;

use super::jbd_fs::JbdFs;
use super::tags::TagIter;
use super::types::*;
use super::LogRing;
use crate::block::{Block, BlockDev, BlockDevice};
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{ExtSuperblock, InodeBlockMap};

/// 一趟遍历要做的事
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Scan,
    Revoke,
    Recover,
}

/// 重放信息
#[derive(Debug, Default)]
struct RecoverInfo {
    /// 起始事务序列号
    start_trans_id: u32,
    /// 最后一个有效事务的序列号
    last_trans_id: u32,
    /// 撤销索引：块号 -> 撤销它的最高事务序列号
    revoke_index: BTreeMap<u64, u32>,
}

/// 执行 journal 恢复
///
/// 前置条件之外（`sb.start == 0`，日志干净）立即返回。成功后清除
/// 文件系统 superblock 的 RECOVER 标志、把日志 `start` 置 0，并把
/// 两个 superblock 写回设备。
pub(super) fn recover<D: BlockDevice, M: InodeBlockMap<D>>(
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    fs_sb: &mut ExtSuperblock,
) -> Result<()> {
    if jbd_fs.start() == 0 {
        return Ok(());
    }

    let mut info = RecoverInfo::default();
    iterate_log(jbd_fs, bdev, fs_sb, &mut info, Action::Scan)?;
    iterate_log(jbd_fs, bdev, fs_sb, &mut info, Action::Revoke)?;
    iterate_log(jbd_fs, bdev, fs_sb, &mut info, Action::Recover)?;

    // 重放的原位块落盘
    for comp in bdev.flush_all()? {
        comp.result?;
    }

    jbd_fs.set_start(0);
    let features = fs_sb.features_incompatible() & !EXT4_FINCOM_RECOVER;
    fs_sb.set_features_incompatible(features);
    fs_sb.write(bdev)?;
    Ok(())
}

/// 读入一个日志块的内容
fn read_log_block<D: BlockDevice, M: InodeBlockMap<D>>(
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    iblock: u32,
) -> Result<Vec<u8>> {
    let phys = jbd_fs.bmap(bdev, iblock)?;
    let mut block = Block::get(bdev, phys)?;
    block.mark_flush();
    block.with_data(|d| d.to_vec())
}

/// 日志重放的核心循环
fn iterate_log<D: BlockDevice, M: InodeBlockMap<D>>(
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    fs_sb: &mut ExtSuperblock,
    info: &mut RecoverInfo,
    action: Action,
) -> Result<()> {
    let start_trans_id = jbd_fs.sequence();
    let start_block = jbd_fs.start();
    let ring = LogRing::new(jbd_fs.first(), jbd_fs.max_len());

    let mut this_trans_id = start_trans_id;
    let mut this_block = start_block;

    debug!(
        "journal {:?} pass from block {}, trans id {}",
        action, start_block, start_trans_id
    );

    loop {
        // SCAN 在找最后一个有效事务；其余两趟到此为止
        if action != Action::Scan && this_trans_id > info.last_trans_id {
            break;
        }

        let data = read_log_block(jbd_fs, bdev, this_block)?;
        let Some(header) = BlockHeader::read(&data) else {
            break;
        };

        // magic 不符：到达日志末尾
        if !header.verify_magic() {
            break;
        }

        // 序列号断裂：SCAN 视作日志结束，其余两趟视作损坏
        if header.sequence != this_trans_id {
            if action != Action::Scan {
                return Err(Error::new(
                    ErrorKind::Corrupted,
                    "unexpected sequence number in journal",
                ));
            }
            break;
        }

        match header.blocktype {
            JBD_DESCRIPTOR_BLOCK => {
                debug!(
                    "descriptor block {}, trans id {}",
                    this_block, this_trans_id
                );
                let table = &data[JBD_BHDR_SIZE..];
                if action == Action::Recover {
                    let tags: Vec<_> = TagIter::new(&jbd_fs.sb, table).collect();
                    for tag in tags {
                        this_block = ring.next(this_block);
                        replay_block(jbd_fs, bdev, fs_sb, info, this_trans_id, this_block, tag.block)?;
                    }
                } else {
                    for tag in TagIter::new(&jbd_fs.sb, table) {
                        this_block = ring.next(this_block);
                        debug!("block {} in tag", tag.block);
                    }
                }
            }
            JBD_COMMIT_BLOCK => {
                debug!("commit block {}, trans id {}", this_block, this_trans_id);
                // 事务结束，前进到下一个事务
                this_trans_id += 1;
            }
            JBD_REVOKE_BLOCK => {
                debug!("revoke block {}, trans id {}", this_block, this_trans_id);
                if action == Action::Revoke {
                    build_revoke_index(&jbd_fs.sb, &data, this_trans_id, &mut info.revoke_index);
                }
            }
            _ => break,
        }

        this_block = ring.next(this_block);
        if this_block == start_block {
            break;
        }
    }

    if action == Action::Scan {
        info.start_trans_id = start_trans_id;
        info.last_trans_id = if this_trans_id > start_trans_id {
            this_trans_id - 1
        } else {
            this_trans_id
        };
        debug!(
            "scan done: trans ids {}..={}",
            info.start_trans_id, info.last_trans_id
        );
    }
    Ok(())
}

/// 重放一个日志副本
///
/// `target == 0`（ESCAPE 标签）时该副本被当作文件系统 superblock：
/// 其位于块内 1024 字节偏移处的内容整块替换内存中的 superblock，
/// `state` 与 `mount_count` 保留，然后写回设备。
fn replay_block<D: BlockDevice, M: InodeBlockMap<D>>(
    jbd_fs: &mut JbdFs<M>,
    bdev: &mut BlockDev<D>,
    fs_sb: &mut ExtSuperblock,
    info: &RecoverInfo,
    this_trans_id: u32,
    jblock: u32,
    target: u64,
) -> Result<()> {
    // 只在当前事务不早于撤销事务时重放
    if let Some(&revoked_at) = info.revoke_index.get(&target) {
        if this_trans_id < revoked_at {
            debug!("block {} revoked at trans id {}, skipped", target, revoked_at);
            return Ok(());
        }
    }

    debug!("replaying block {} from log block {}", target, jblock);
    let copy = read_log_block(jbd_fs, bdev, jblock)?;

    if target != 0 {
        let mut block = Block::get_noread(bdev, target)?;
        block.with_data_mut(|d| {
            let n = d.len().min(copy.len());
            d[..n].copy_from_slice(&copy[..n]);
        })?;
        block.release()
    } else {
        let end = EXT4_SUPERBLOCK_OFFSET as usize + EXT4_SUPERBLOCK_SIZE;
        if copy.len() < end {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "escaped superblock copy truncated",
            ));
        }

        let state = fs_sb.state();
        let mount_count = fs_sb.mount_count();
        fs_sb.overwrite_from(&copy[EXT4_SUPERBLOCK_OFFSET as usize..end]);
        fs_sb.set_state(state);
        fs_sb.set_mount_count(mount_count);
        fs_sb.write(bdev)
    }
}

/// 把一个撤销块的所有条目并入撤销索引
///
/// 同一块号重复出现时覆盖为当前事务序列号——REVOKE 趟按序列号
/// 递增遍历，效果是"最新者生效"。
fn build_revoke_index(sb: &JbdSb, data: &[u8], this_trans_id: u32, index: &mut BTreeMap<u64, u32>) {
    let Some(header) = RevokeHeader::read(data) else {
        return;
    };
    let record_len: usize = if sb.is_64bit() { 8 } else { 4 };
    let limit = (header.count as usize).min(data.len());

    let mut off = JBD_REVOKE_HEADER_SIZE;
    while off + record_len <= limit {
        let lba = if record_len == 8 {
            get_be64(data, off)
        } else {
            get_be32(data, off) as u64
        };
        debug!("revoke entry: block {}, trans id {}", lba, this_trans_id);
        index.insert(lba, this_trans_id);
        off += record_len;
    }
}
