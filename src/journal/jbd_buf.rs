//! JBD Buffer
//!
//! 事务中一个被修改块的记录。从 `set_block_dirty` 起持有底层
//! 缓存块的一个引用，到日志副本落盘且原位写完成（或事务中止）
//! 为止。

/// JBD Buffer（日志缓冲区）
///
/// # 字段说明
///
/// - `lba`: 该块的原位逻辑块地址（也是缓存键）
/// - `jbd_lba`: 日志内容纳其副本的逻辑块号，提交时填写
/// - `trans`: 所属事务的会话句柄
#[derive(Debug, Clone, Copy)]
pub struct JbdBuf {
    /// 原位逻辑块地址
    pub lba: u64,

    /// 日志内副本的逻辑块号（提交前为 0）
    pub jbd_lba: u32,

    /// 所属事务句柄
    pub(super) trans: u64,
}

impl JbdBuf {
    /// 创建一个日志缓冲区记录
    pub(super) fn new(lba: u64, trans: u64) -> Self {
        Self {
            lba,
            jbd_lba: 0,
            trans,
        }
    }
}
