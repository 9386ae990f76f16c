//! JBD 文件系统管理
//!
//! 管理 journal inode 与 journal superblock，提供 journal 块映射。

use super::recovery;
use super::types::*;
use crate::block::{BlockDev, BlockDevice};
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{ExtSuperblock, InodeBlockMap};

/// JBD 文件系统实例
///
/// 持有 journal inode 的块映射和已加载的 journal superblock。
/// mount 时通过 [`JbdFs::get`] 创建，unmount 时 [`JbdFs::put`] 写回
/// 脏 superblock。
pub struct JbdFs<M> {
    map: M,

    /// Journal superblock
    pub sb: JbdSb,

    dirty: bool,
}

impl<M> JbdFs<M> {
    /// 获取 journal 块大小
    pub fn block_size(&self) -> u32 {
        self.sb.blocksize()
    }

    /// 获取 journal 总块数
    pub fn max_len(&self) -> u32 {
        self.sb.maxlen()
    }

    /// 获取日志区第一个块号
    pub fn first(&self) -> u32 {
        self.sb.first()
    }

    /// 获取日志起始块号（0 表示干净）
    pub fn start(&self) -> u32 {
        self.sb.start()
    }

    /// 设置日志起始块号
    pub fn set_start(&mut self, start: u32) {
        self.sb.set_start(start);
        self.dirty = true;
    }

    /// 获取日志起点处的事务序列号
    pub fn sequence(&self) -> u32 {
        self.sb.sequence()
    }

    /// 设置事务序列号
    pub fn set_sequence(&mut self, seq: u32) {
        self.sb.set_sequence(seq);
        self.dirty = true;
    }

    /// 标记 journal superblock 为脏
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// journal superblock 是否脏
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl<M> JbdFs<M> {
    /// 从文件系统加载 journal
    ///
    /// # 参数
    ///
    /// * `bdev` - 块设备
    /// * `fs_sb` - 文件系统 superblock
    /// * `map` - journal inode 的块映射
    ///
    /// # 实现说明
    ///
    /// 1. 检查 HAS_JOURNAL 特性和 journal inode 号
    /// 2. 读取 journal 第 0 块处的 superblock
    /// 3. 校验 magic 与块类型，失败报 `Io`
    pub fn get<D: BlockDevice>(
        bdev: &mut BlockDev<D>,
        fs_sb: &ExtSuperblock,
        map: M,
    ) -> Result<Self>
    where
        M: InodeBlockMap<D>,
    {
        if !fs_sb.has_compat_feature(EXT4_FEATURE_COMPAT_HAS_JOURNAL) {
            return Err(Error::new(ErrorKind::NotFound, "filesystem has no journal"));
        }
        if fs_sb.journal_inode_number() == 0 {
            return Err(Error::new(ErrorKind::NotFound, "journal inode not set"));
        }

        let mut jbd_fs = Self {
            map,
            sb: JbdSb::default(),
            dirty: false,
        };

        let fblock = jbd_fs.bmap(bdev, 0)?;
        let offset = fblock * bdev.block_size() as u64;
        let mut raw = [0u8; JBD_SUPERBLOCK_SIZE];
        bdev.read_bytes_direct(offset, &mut raw)?;

        let sb = JbdSb::from_bytes(&raw)?;
        if !sb.verify() {
            return Err(Error::new(ErrorKind::Io, "invalid journal superblock"));
        }

        jbd_fs.sb = sb;
        Ok(jbd_fs)
    }

    /// 写回并释放 journal
    pub fn put<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>) -> Result<()>
    where
        M: InodeBlockMap<D>,
    {
        self.write_sb(bdev)
    }

    /// 将 journal 内逻辑块号映射到设备物理块号
    pub fn bmap<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, iblock: u32) -> Result<u64>
    where
        M: InodeBlockMap<D>,
    {
        self.map.dblk_idx(bdev, iblock)
    }

    /// 执行 journal 崩溃恢复
    ///
    /// # 恢复流程
    ///
    /// 1. 日志干净（`start == 0`）时立即返回
    /// 2. SCAN：确定最后一个有效事务
    /// 3. REVOKE：建立撤销索引
    /// 4. RECOVER：把日志副本写回原位，跳过被后续事务撤销的块
    /// 5. 清除文件系统 RECOVER 标志，`start` 置 0
    pub fn recover<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        fs_sb: &mut ExtSuperblock,
    ) -> Result<()>
    where
        M: InodeBlockMap<D>,
    {
        recovery::recover(self, bdev, fs_sb)
    }

    /// 写回脏的 journal superblock
    ///
    /// superblock 位于 journal 第 0 块的开头。
    pub(super) fn write_sb<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>) -> Result<()>
    where
        M: InodeBlockMap<D>,
    {
        if !self.dirty {
            return Ok(());
        }

        let fblock = self.bmap(bdev, 0)?;
        let offset = fblock * bdev.block_size() as u64;
        bdev.write_bytes_direct(offset, self.sb.as_bytes())?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_track_dirty() {
        let mut sb = JbdSb::default();
        sb.set_maxlen(1024);
        sb.set_first(1);
        sb.set_sequence(100);
        sb.set_start(10);

        let mut jbd_fs = JbdFs {
            map: (),
            sb,
            dirty: false,
        };

        assert_eq!(jbd_fs.block_size(), 4096);
        assert_eq!(jbd_fs.max_len(), 1024);
        assert_eq!(jbd_fs.first(), 1);
        assert_eq!(jbd_fs.sequence(), 100);
        assert_eq!(jbd_fs.start(), 10);
        assert!(!jbd_fs.is_dirty());

        jbd_fs.set_sequence(200);
        assert!(jbd_fs.is_dirty());
        assert_eq!(jbd_fs.sequence(), 200);

        jbd_fs.set_start(0);
        assert_eq!(jbd_fs.start(), 0);
    }
}
