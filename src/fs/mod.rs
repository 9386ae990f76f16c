//! 宿主文件系统契约
//!
//! 日志子系统不实现 inode、extent 或目录逻辑，只消费宿主文件系统的
//! 两个能力：
//!
//! 1. [`ExtSuperblock`] - ext4 superblock 中日志会触碰的字段
//!    （journal inode 号、RECOVER 标志、state、mount_count），以及
//!    整块读写。所有字段为小端序。
//! 2. [`InodeBlockMap`] - journal inode 的块映射：journal 内逻辑块号
//!    到设备物理块号。由宿主的 inode/extent 层实现。

use crate::block::{BlockDev, BlockDevice};
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};

/// journal inode 的块映射
///
/// 宿主文件系统实现该 trait，把 journal inode 内的逻辑块号解析为
/// 设备物理块号。映射过程中允许访问设备（读 extent 树等）。
pub trait InodeBlockMap<D: BlockDevice> {
    /// journal 内逻辑块号 -> 设备物理块号
    fn dblk_idx(&mut self, bdev: &mut BlockDev<D>, iblock: u32) -> Result<u64>;
}

// 小端序字段偏移
const OFF_MNT_COUNT: usize = 0x34;
const OFF_MAGIC: usize = 0x38;
const OFF_STATE: usize = 0x3A;
const OFF_FEATURE_COMPAT: usize = 0x5C;
const OFF_FEATURE_INCOMPAT: usize = 0x60;
const OFF_JOURNAL_INUM: usize = 0xE0;

/// ext4 superblock（日志视角）
///
/// 持有完整的 1024 字节原始内容；访问器只覆盖日志触碰的字段。
/// 日志重放 ESCAPE 标签时会整块替换原始内容（保留 state 与
/// mount_count），随后整块写回设备。
#[derive(Debug, Clone)]
pub struct ExtSuperblock {
    raw: [u8; EXT4_SUPERBLOCK_SIZE],
}

impl ExtSuperblock {
    /// 从原始字节构造
    pub fn from_bytes(raw: [u8; EXT4_SUPERBLOCK_SIZE]) -> Self {
        Self { raw }
    }

    /// 从设备读入（偏移 1024 字节处）
    pub fn load<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<Self> {
        let mut raw = [0u8; EXT4_SUPERBLOCK_SIZE];
        bdev.read_bytes_direct(EXT4_SUPERBLOCK_OFFSET, &mut raw)?;
        let sb = Self { raw };
        if sb.magic() != EXT4_SUPERBLOCK_MAGIC {
            return Err(Error::new(ErrorKind::Corrupted, "bad ext4 superblock magic"));
        }
        Ok(sb)
    }

    /// 写回设备（偏移 1024 字节处）
    pub fn write<D: BlockDevice>(&self, bdev: &mut BlockDev<D>) -> Result<()> {
        bdev.write_bytes_direct(EXT4_SUPERBLOCK_OFFSET, &self.raw)?;
        Ok(())
    }

    /// 原始字节
    pub fn as_bytes(&self) -> &[u8; EXT4_SUPERBLOCK_SIZE] {
        &self.raw
    }

    /// 用 `src` 的内容整块替换（日志重放 superblock 副本时使用）
    pub fn overwrite_from(&mut self, src: &[u8]) {
        self.raw.copy_from_slice(&src[..EXT4_SUPERBLOCK_SIZE]);
    }

    fn get16(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.raw[off], self.raw[off + 1]])
    }

    fn set16(&mut self, off: usize, v: u16) {
        self.raw[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn get32(&self, off: usize) -> u32 {
        u32::from_le_bytes([
            self.raw[off],
            self.raw[off + 1],
            self.raw[off + 2],
            self.raw[off + 3],
        ])
    }

    fn set32(&mut self, off: usize, v: u32) {
        self.raw[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// superblock magic
    pub fn magic(&self) -> u16 {
        self.get16(OFF_MAGIC)
    }

    /// 设置 magic
    pub fn set_magic(&mut self, v: u16) {
        self.set16(OFF_MAGIC, v);
    }

    /// 文件系统状态
    pub fn state(&self) -> u16 {
        self.get16(OFF_STATE)
    }

    /// 设置文件系统状态
    pub fn set_state(&mut self, v: u16) {
        self.set16(OFF_STATE, v);
    }

    /// mount 计数
    pub fn mount_count(&self) -> u16 {
        self.get16(OFF_MNT_COUNT)
    }

    /// 设置 mount 计数
    pub fn set_mount_count(&mut self, v: u16) {
        self.set16(OFF_MNT_COUNT, v);
    }

    /// compat 特性集
    pub fn features_compatible(&self) -> u32 {
        self.get32(OFF_FEATURE_COMPAT)
    }

    /// 设置 compat 特性集
    pub fn set_features_compatible(&mut self, v: u32) {
        self.set32(OFF_FEATURE_COMPAT, v);
    }

    /// incompat 特性集
    pub fn features_incompatible(&self) -> u32 {
        self.get32(OFF_FEATURE_INCOMPAT)
    }

    /// 设置 incompat 特性集
    pub fn set_features_incompatible(&mut self, v: u32) {
        self.set32(OFF_FEATURE_INCOMPAT, v);
    }

    /// 是否带某个 compat 特性
    pub fn has_compat_feature(&self, feature: u32) -> bool {
        self.features_compatible() & feature != 0
    }

    /// journal inode 号（通常为 8）
    pub fn journal_inode_number(&self) -> u32 {
        self.get32(OFF_JOURNAL_INUM)
    }

    /// 设置 journal inode 号
    pub fn set_journal_inode_number(&mut self, v: u32) {
        self.set32(OFF_JOURNAL_INUM, v);
    }
}

impl Default for ExtSuperblock {
    fn default() -> Self {
        let mut sb = Self {
            raw: [0u8; EXT4_SUPERBLOCK_SIZE],
        };
        sb.set_magic(EXT4_SUPERBLOCK_MAGIC);
        sb
    }
}
