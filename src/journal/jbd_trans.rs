//! JBD Transaction
//!
//! 事务：一组原子提交的块修改，外加撤销记录。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::jbd_buf::JbdBuf;
use crate::error::Error;

/// 撤销记录
///
/// 事务撤销列表中的一项，提交时序列化进撤销块。
#[derive(Debug, Clone, Copy)]
pub struct JbdRevokeRec {
    /// 被撤销的原位块地址
    pub lba: u64,
}

/// 块记录
///
/// 记录一个原位块当前被哪个事务持有。全局索引中每个 LBA 至多
/// 一条，保证同一块不会同时带着两个未提交事务的修改。
#[derive(Debug)]
pub struct JbdBlockRec {
    /// 原位块地址
    pub lba: u64,

    /// 持有该块的事务句柄
    pub trans: u64,

    /// 该块的缓存缓冲区地址；原位写完成后置空
    pub buf: Option<u64>,
}

/// JBD Transaction（事务）
///
/// # 生命周期
///
/// `new_trans` 创建（分配会话句柄）；`set_block_dirty`/`revoke_block`
/// 填充；`submit_trans` 入队；提交时分配磁盘序列号并写出描述符、
/// 数据副本、撤销块和提交块；之后挂在检查点队列上，直到所有
/// 原位写完成（`written_cnt == data_cnt`）被释放。
#[derive(Debug)]
pub struct JbdTrans {
    /// 会话内唯一句柄，创建时分配
    pub(super) handle: u64,

    /// 磁盘事务序列号，提交时分配
    pub trans_id: u32,

    /// 本事务在日志内的起始块号（0 表示尚未分配）
    pub start_iblock: u32,

    /// 本事务占用的日志块数
    pub alloc_blocks: u32,

    /// 待原位写回的数据块数
    pub data_cnt: usize,

    /// 已完成原位写回的数据块数
    pub written_cnt: usize,

    /// 异步写回路径上报的第一个错误
    pub error: Option<Error>,

    /// 本事务修改的块
    pub(super) buf_queue: VecDeque<JbdBuf>,

    /// 本事务的撤销记录
    pub(super) revoke_list: Vec<JbdRevokeRec>,
}

impl JbdTrans {
    pub(super) fn new(handle: u64) -> Self {
        Self {
            handle,
            trans_id: 0,
            start_iblock: 0,
            alloc_blocks: 0,
            data_cnt: 0,
            written_cnt: 0,
            error: None,
            buf_queue: VecDeque::new(),
            revoke_list: Vec::new(),
        }
    }

    /// 追加一条撤销记录
    ///
    /// 调用方释放一个块、需要作废其早先的日志副本时使用。
    pub fn revoke_block(&mut self, lba: u64) {
        self.revoke_list.push(JbdRevokeRec { lba });
    }

    /// 事务中的缓冲区数
    pub fn buffer_count(&self) -> usize {
        self.buf_queue.len()
    }

    /// 事务中的撤销记录数
    pub fn revoke_count(&self) -> usize {
        self.revoke_list.len()
    }

    /// 是否发生过错误
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
