//! 缓存块结构
//!
//! 单个缓存块：数据、状态标志、引用计数，以及写完成能力标记。

use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// 缓存块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u8 {
        /// 数据已更新（有效）
        const UPTODATE = 0x01;
        /// 数据已修改（脏）
        const DIRTY    = 0x02;
        /// 写穿：最后一个引用释放时立即写盘
        const FLUSH    = 0x04;
    }
}

/// 写完成能力标记
///
/// 标识一个缓冲区的原位写完成后需要通知谁。日志通过该标记识别
/// 自己挂接过的缓冲区；每个缓冲区最多挂接一个。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndWrite {
    /// 未被日志挂接
    #[default]
    None,
    /// 被日志挂接；`trans` 为会话内唯一的事务句柄
    Journal {
        /// 持有该缓冲区的事务句柄
        trans: u64,
    },
}

/// 缓存块
///
/// 缓存中的一个块。脏块或仍被引用的块不会被驱逐；
/// 带 [`CacheFlags::FLUSH`] 的脏块在最后一个引用释放时写穿到设备。
#[derive(Debug)]
pub struct CacheBuffer {
    /// 逻辑块地址
    pub lba: u64,

    /// 块数据
    pub data: Vec<u8>,

    flags: CacheFlags,
    refctr: u32,
    end_write: EndWrite,
}

impl CacheBuffer {
    /// 创建新的缓存块
    pub fn new(lba: u64, block_size: usize) -> Self {
        Self {
            lba,
            data: alloc::vec![0u8; block_size],
            flags: CacheFlags::empty(),
            refctr: 0,
            end_write: EndWrite::None,
        }
    }

    /// 标记为脏（已修改）
    pub fn mark_dirty(&mut self) {
        self.flags.insert(CacheFlags::DIRTY);
    }

    /// 标记为干净（已写入磁盘）
    pub fn clear_dirty(&mut self) {
        self.flags.remove(CacheFlags::DIRTY);
    }

    /// 检查是否是脏块
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(CacheFlags::DIRTY)
    }

    /// 标记数据有效
    pub fn mark_uptodate(&mut self) {
        self.flags.insert(CacheFlags::UPTODATE);
    }

    /// 检查数据是否有效
    pub fn is_uptodate(&self) -> bool {
        self.flags.contains(CacheFlags::UPTODATE)
    }

    /// 标记为写穿
    pub fn mark_flush(&mut self) {
        self.flags.insert(CacheFlags::FLUSH);
    }

    /// 检查是否写穿
    pub fn needs_flush(&self) -> bool {
        self.flags.contains(CacheFlags::FLUSH)
    }

    /// 增加引用计数
    pub fn inc_ref(&mut self) {
        self.refctr += 1;
    }

    /// 减少引用计数
    pub fn dec_ref(&mut self) {
        self.refctr = self.refctr.saturating_sub(1);
    }

    /// 当前引用计数
    pub fn ref_count(&self) -> u32 {
        self.refctr
    }

    /// 当前写完成标记
    pub fn end_write(&self) -> EndWrite {
        self.end_write
    }

    /// 设置写完成标记
    pub fn set_end_write(&mut self, tag: EndWrite) {
        self.end_write = tag;
    }

    /// 取走写完成标记（置回 [`EndWrite::None`]）
    pub fn take_end_write(&mut self) -> EndWrite {
        core::mem::take(&mut self.end_write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_creation() {
        let buf = CacheBuffer::new(100, 4096);
        assert_eq!(buf.lba, 100);
        assert_eq!(buf.data.len(), 4096);
        assert!(!buf.is_dirty());
        assert_eq!(buf.ref_count(), 0);
        assert_eq!(buf.end_write(), EndWrite::None);
    }

    #[test]
    fn test_dirty_flag() {
        let mut buf = CacheBuffer::new(100, 4096);

        buf.mark_dirty();
        assert!(buf.is_dirty());

        buf.clear_dirty();
        assert!(!buf.is_dirty());
    }

    #[test]
    fn test_ref_counting() {
        let mut buf = CacheBuffer::new(100, 4096);

        buf.inc_ref();
        buf.inc_ref();
        assert_eq!(buf.ref_count(), 2);

        buf.dec_ref();
        buf.dec_ref();
        assert_eq!(buf.ref_count(), 0);

        // 饱和减法，不会下溢
        buf.dec_ref();
        assert_eq!(buf.ref_count(), 0);
    }

    #[test]
    fn test_end_write_tag() {
        let mut buf = CacheBuffer::new(100, 4096);

        buf.set_end_write(EndWrite::Journal { trans: 7 });
        assert_eq!(buf.end_write(), EndWrite::Journal { trans: 7 });

        let taken = buf.take_end_write();
        assert_eq!(taken, EndWrite::Journal { trans: 7 });
        assert_eq!(buf.end_write(), EndWrite::None);
    }
}
