//! JBD 磁盘格式定义
//!
//! 定义 journal 的所有磁盘格式结构。
//!
//! # 重要说明
//!
//! - **所有字段都是大端序（big-endian）**
//! - 编解码通过按偏移的 `get32`/`set32` 等访问器完成，不做任何
//!   结构体透写，保证与 Linux ext3/ext4 的格式逐字节兼容
//!
//! # Journal superblock 布局
//!
//! ```text
//! Offset  Size  Field
//! 0x0000  12    header (magic / blocktype / sequence)
//! 0x000C  4     blocksize
//! 0x0010  4     maxlen
//! 0x0014  4     first
//! 0x0018  4     sequence
//! 0x001C  4     start
//! 0x0020  4     errno
//! 0x0024  4     feature_compat
//! 0x0028  4     feature_incompat
//! 0x002C  4     feature_ro_compat
//! 0x0030  16    uuid
//! 0x0040  4     nr_users
//! 0x0044  4     dynsuper
//! 0x0048  4     max_transaction
//! 0x004C  4     max_trans_data
//! 0x0050  1     checksum_type
//! 0x0051  3     padding2
//! 0x0054  168   padding (42 * 4)
//! 0x00FC  4     checksum
//! 0x0100  768   users (48 * 16)
//! 0x0400  END   (total 1024 bytes)
//! ```

use crate::error::{Error, ErrorKind, Result};

/// UUID 大小（128位）
pub const UUID_SIZE: usize = 16;

/// JBD magic number
pub const JBD_MAGIC_NUMBER: u32 = 0xC03B_3998;

/// Journal superblock 大小（字节）
pub const JBD_SUPERBLOCK_SIZE: usize = 1024;

/// 块头大小：magic(4) + blocktype(4) + sequence(4)
pub const JBD_BHDR_SIZE: usize = 12;

/// Revoke 块头大小：块头 + count(4)
pub const JBD_REVOKE_HEADER_SIZE: usize = JBD_BHDR_SIZE + 4;

/// 块尾大小：checksum(4) + pad(8)
///
/// CSUM_V2/V3 生效时描述符/撤销块末尾预留的空间。本实现只在
/// 迭代时预留，从不写入校验和。
pub const JBD_BLOCK_TAIL_SIZE: usize = 12;

// =============================================================================
// 块类型
// =============================================================================

/// 描述符块
pub const JBD_DESCRIPTOR_BLOCK: u32 = 1;
/// 提交块
pub const JBD_COMMIT_BLOCK: u32 = 2;
/// Superblock v1
pub const JBD_SUPERBLOCK: u32 = 3;
/// Superblock v2
pub const JBD_SUPERBLOCK_V2: u32 = 4;
/// 撤销块
pub const JBD_REVOKE_BLOCK: u32 = 5;

// =============================================================================
// 标签标志
// =============================================================================

/// 数据块以 magic 开头，拷贝前首字已被清零
pub const JBD_FLAG_ESCAPE: u32 = 1;
/// UUID 与前一个标签相同（不内联写出）
pub const JBD_FLAG_SAME_UUID: u32 = 2;
/// 块已被本事务删除
pub const JBD_FLAG_DELETED: u32 = 4;
/// 描述符块中的最后一个标签
pub const JBD_FLAG_LAST_TAG: u32 = 8;

// =============================================================================
// 特性标志
// =============================================================================

/// Compat 特性：checksum v1
pub const JBD_FEATURE_COMPAT_CHECKSUM: u32 = 0x0000_0001;

/// Incompat 特性：revoke 支持
pub const JBD_FEATURE_INCOMPAT_REVOKE: u32 = 0x0000_0001;
/// Incompat 特性：64 位块号
pub const JBD_FEATURE_INCOMPAT_64BIT: u32 = 0x0000_0002;
/// Incompat 特性：异步提交
pub const JBD_FEATURE_INCOMPAT_ASYNC_COMMIT: u32 = 0x0000_0004;
/// Incompat 特性：checksum v2 (crc32c)
pub const JBD_FEATURE_INCOMPAT_CSUM_V2: u32 = 0x0000_0008;
/// Incompat 特性：checksum v3（标签内完整 32 位校验和）
pub const JBD_FEATURE_INCOMPAT_CSUM_V3: u32 = 0x0000_0010;

// =============================================================================
// 大端序编解码辅助
// =============================================================================

pub(crate) fn get_be16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

pub(crate) fn put_be16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_be_bytes());
}

pub(crate) fn get_be32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(crate) fn put_be32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_be_bytes());
}

pub(crate) fn get_be64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(b)
}

pub(crate) fn put_be64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_be_bytes());
}

// =============================================================================
// 块头
// =============================================================================

/// JBD 块头（所有日志记录块的标准头部）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Magic number (0xC03B3998)
    pub magic: u32,
    /// 块类型
    pub blocktype: u32,
    /// 事务序列号
    pub sequence: u32,
}

impl BlockHeader {
    /// 创建一个带 magic 的块头
    pub fn new(blocktype: u32, sequence: u32) -> Self {
        Self {
            magic: JBD_MAGIC_NUMBER,
            blocktype,
            sequence,
        }
    }

    /// 从块开头解码；缓冲区不足 12 字节时返回 `None`
    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < JBD_BHDR_SIZE {
            return None;
        }
        Some(Self {
            magic: get_be32(buf, 0),
            blocktype: get_be32(buf, 4),
            sequence: get_be32(buf, 8),
        })
    }

    /// 编码到块开头
    pub fn write_to(&self, buf: &mut [u8]) {
        put_be32(buf, 0, self.magic);
        put_be32(buf, 4, self.blocktype);
        put_be32(buf, 8, self.sequence);
    }

    /// 校验 magic
    pub fn verify_magic(&self) -> bool {
        self.magic == JBD_MAGIC_NUMBER
    }
}

// =============================================================================
// Revoke 块头
// =============================================================================

/// Revoke 块头
#[derive(Debug, Clone, Copy)]
pub struct RevokeHeader {
    /// 块头
    pub header: BlockHeader,
    /// 本块已用字节数（含头部）
    pub count: u32,
}

impl RevokeHeader {
    /// 从块开头解码
    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < JBD_REVOKE_HEADER_SIZE {
            return None;
        }
        Some(Self {
            header: BlockHeader::read(buf)?,
            count: get_be32(buf, JBD_BHDR_SIZE),
        })
    }

    /// 编码到块开头
    pub fn write_to(&self, buf: &mut [u8]) {
        self.header.write_to(buf);
        put_be32(buf, JBD_BHDR_SIZE, self.count);
    }
}

// =============================================================================
// Journal superblock
// =============================================================================

// 字段偏移
const OFF_BLOCKSIZE: usize = 0x0C;
const OFF_MAXLEN: usize = 0x10;
const OFF_FIRST: usize = 0x14;
const OFF_SEQUENCE: usize = 0x18;
const OFF_START: usize = 0x1C;
const OFF_ERRNO: usize = 0x20;
const OFF_FEATURE_COMPAT: usize = 0x24;
const OFF_FEATURE_INCOMPAT: usize = 0x28;
const OFF_FEATURE_RO_COMPAT: usize = 0x2C;
const OFF_UUID: usize = 0x30;
const OFF_NR_USERS: usize = 0x40;

/// Journal superblock
///
/// 持有完整 1024 字节原始内容，所有字段通过大端序访问器读写。
#[derive(Debug, Clone)]
pub struct JbdSb {
    raw: [u8; JBD_SUPERBLOCK_SIZE],
}

impl JbdSb {
    /// 从原始字节构造
    ///
    /// 只检查长度，格式校验见 [`JbdSb::verify`]。
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < JBD_SUPERBLOCK_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "journal superblock truncated",
            ));
        }
        let mut raw = [0u8; JBD_SUPERBLOCK_SIZE];
        raw.copy_from_slice(&buf[..JBD_SUPERBLOCK_SIZE]);
        Ok(Self { raw })
    }

    /// 原始字节
    pub fn as_bytes(&self) -> &[u8; JBD_SUPERBLOCK_SIZE] {
        &self.raw
    }

    /// 校验 magic 与块类型
    pub fn verify(&self) -> bool {
        let Some(header) = BlockHeader::read(&self.raw) else {
            return false;
        };
        header.verify_magic()
            && (header.blocktype == JBD_SUPERBLOCK || header.blocktype == JBD_SUPERBLOCK_V2)
    }

    /// 块类型
    pub fn blocktype(&self) -> u32 {
        get_be32(&self.raw, 4)
    }

    /// 日志块大小
    pub fn blocksize(&self) -> u32 {
        get_be32(&self.raw, OFF_BLOCKSIZE)
    }

    /// 设置日志块大小
    pub fn set_blocksize(&mut self, v: u32) {
        put_be32(&mut self.raw, OFF_BLOCKSIZE, v);
    }

    /// 日志总块数
    pub fn maxlen(&self) -> u32 {
        get_be32(&self.raw, OFF_MAXLEN)
    }

    /// 设置日志总块数
    pub fn set_maxlen(&mut self, v: u32) {
        put_be32(&mut self.raw, OFF_MAXLEN, v);
    }

    /// 日志区第一个块号（通常为 1）
    pub fn first(&self) -> u32 {
        get_be32(&self.raw, OFF_FIRST)
    }

    /// 设置日志区第一个块号
    pub fn set_first(&mut self, v: u32) {
        put_be32(&mut self.raw, OFF_FIRST, v);
    }

    /// 日志起点处的事务序列号
    pub fn sequence(&self) -> u32 {
        get_be32(&self.raw, OFF_SEQUENCE)
    }

    /// 设置事务序列号
    pub fn set_sequence(&mut self, v: u32) {
        put_be32(&mut self.raw, OFF_SEQUENCE, v);
    }

    /// 第一个未重放的日志块号；0 表示日志干净
    pub fn start(&self) -> u32 {
        get_be32(&self.raw, OFF_START)
    }

    /// 设置日志起始块号
    pub fn set_start(&mut self, v: u32) {
        put_be32(&mut self.raw, OFF_START, v);
    }

    /// 错误值
    pub fn errno(&self) -> i32 {
        get_be32(&self.raw, OFF_ERRNO) as i32
    }

    /// compat 特性集
    pub fn feature_compat(&self) -> u32 {
        get_be32(&self.raw, OFF_FEATURE_COMPAT)
    }

    /// incompat 特性集
    pub fn feature_incompat(&self) -> u32 {
        get_be32(&self.raw, OFF_FEATURE_INCOMPAT)
    }

    /// 设置 incompat 特性集
    pub fn set_feature_incompat(&mut self, v: u32) {
        put_be32(&mut self.raw, OFF_FEATURE_INCOMPAT, v);
    }

    /// ro-compat 特性集
    pub fn feature_ro_compat(&self) -> u32 {
        get_be32(&self.raw, OFF_FEATURE_RO_COMPAT)
    }

    /// journal UUID
    pub fn uuid(&self) -> [u8; UUID_SIZE] {
        let mut uuid = [0u8; UUID_SIZE];
        uuid.copy_from_slice(&self.raw[OFF_UUID..OFF_UUID + UUID_SIZE]);
        uuid
    }

    /// 设置 journal UUID
    pub fn set_uuid(&mut self, uuid: &[u8; UUID_SIZE]) {
        self.raw[OFF_UUID..OFF_UUID + UUID_SIZE].copy_from_slice(uuid);
    }

    /// 共享该日志的文件系统数
    pub fn nr_users(&self) -> u32 {
        get_be32(&self.raw, OFF_NR_USERS)
    }

    /// 是否带某个 compat 特性
    ///
    /// 特性字段只在 v2 superblock 上有意义。
    pub fn has_compat_feature(&self, feature: u32) -> bool {
        self.blocktype() >= JBD_SUPERBLOCK_V2 && self.feature_compat() & feature != 0
    }

    /// 是否带某个 incompat 特性
    pub fn has_incompat_feature(&self, feature: u32) -> bool {
        self.blocktype() >= JBD_SUPERBLOCK_V2 && self.feature_incompat() & feature != 0
    }

    /// 是否带某个 ro-compat 特性
    pub fn has_ro_compat_feature(&self, feature: u32) -> bool {
        self.blocktype() >= JBD_SUPERBLOCK_V2 && self.feature_ro_compat() & feature != 0
    }

    /// 是否使用 64 位块号
    pub fn is_64bit(&self) -> bool {
        self.has_incompat_feature(JBD_FEATURE_INCOMPAT_64BIT)
    }

    /// CSUM_V2 或 CSUM_V3 是否生效
    pub fn has_csum(&self) -> bool {
        self.has_incompat_feature(JBD_FEATURE_INCOMPAT_CSUM_V2)
            || self.has_incompat_feature(JBD_FEATURE_INCOMPAT_CSUM_V3)
    }
}

impl Default for JbdSb {
    fn default() -> Self {
        let mut sb = Self {
            raw: [0u8; JBD_SUPERBLOCK_SIZE],
        };
        BlockHeader::new(JBD_SUPERBLOCK_V2, 0).write_to(&mut sb.raw);
        sb.set_blocksize(4096);
        sb
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bhdr_roundtrip() {
        let mut buf = [0u8; JBD_BHDR_SIZE];
        BlockHeader::new(JBD_DESCRIPTOR_BLOCK, 100).write_to(&mut buf);

        // 大端序
        assert_eq!(&buf[0..4], &[0xC0, 0x3B, 0x39, 0x98]);
        assert_eq!(&buf[4..8], &[0, 0, 0, 1]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 100]);

        let header = BlockHeader::read(&buf).unwrap();
        assert!(header.verify_magic());
        assert_eq!(header.blocktype, JBD_DESCRIPTOR_BLOCK);
        assert_eq!(header.sequence, 100);
    }

    #[test]
    fn test_bhdr_truncated() {
        assert!(BlockHeader::read(&[0u8; 11]).is_none());
    }

    #[test]
    fn test_sb_default_verifies() {
        let sb = JbdSb::default();
        assert!(sb.verify());
        assert_eq!(sb.blocktype(), JBD_SUPERBLOCK_V2);
        assert_eq!(sb.blocksize(), 4096);
    }

    #[test]
    fn test_sb_byte_identical_roundtrip() {
        let mut sb = JbdSb::default();
        sb.set_maxlen(512);
        sb.set_first(1);
        sb.set_sequence(7);
        sb.set_start(13);
        sb.set_uuid(&[0xAA; UUID_SIZE]);

        let copy = JbdSb::from_bytes(sb.as_bytes()).unwrap();
        assert_eq!(copy.as_bytes(), sb.as_bytes());
        assert_eq!(copy.maxlen(), 512);
        assert_eq!(copy.first(), 1);
        assert_eq!(copy.sequence(), 7);
        assert_eq!(copy.start(), 13);
        assert_eq!(copy.uuid(), [0xAA; UUID_SIZE]);
    }

    #[test]
    fn test_sb_field_offsets() {
        let mut sb = JbdSb::default();
        sb.set_start(0x0102_0304);

        // start 字段位于 0x1C，大端序
        assert_eq!(&sb.as_bytes()[0x1C..0x20], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_features_require_v2() {
        let mut sb = JbdSb::default();
        sb.set_feature_incompat(JBD_FEATURE_INCOMPAT_64BIT);
        assert!(sb.is_64bit());

        // v1 superblock 上特性字段无效
        let mut raw = *sb.as_bytes();
        BlockHeader::new(JBD_SUPERBLOCK, 0).write_to(&mut raw);
        let v1 = JbdSb::from_bytes(&raw).unwrap();
        assert!(v1.verify());
        assert!(!v1.is_64bit());
    }

    #[test]
    fn test_revoke_header_roundtrip() {
        let mut buf = [0u8; 64];
        RevokeHeader {
            header: BlockHeader::new(JBD_REVOKE_BLOCK, 9),
            count: 24,
        }
        .write_to(&mut buf);

        let hdr = RevokeHeader::read(&buf).unwrap();
        assert_eq!(hdr.header.blocktype, JBD_REVOKE_BLOCK);
        assert_eq!(hdr.header.sequence, 9);
        assert_eq!(hdr.count, 24);
    }
}
