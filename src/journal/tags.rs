//! 描述符块标签编解码与迭代
//!
//! 标签有两种布局：
//!
//! - **v1**（8/10/14 字节 + 64BIT 时 12 字节）：
//!   `blocknr(4), checksum(2), flags(2)[, blocknr_high(4)]`，
//!   flags 为 16 位大端序
//! - **v3**（CSUM_V3 生效时固定 16 字节）：
//!   `blocknr(4), flags(4), blocknr_high(4), checksum(4)`，
//!   flags 为 32 位大端序
//!
//! 标签后可跟 16 字节 UUID；SAME_UUID 标志置位时省略。描述符块中
//! 第一个标签必须携带 UUID。LAST_TAG 标志标记最后一个标签。
//! ESCAPE 标志表示数据块首字与 magic 冲突、拷贝前已被清零——
//! 提取时块号报告为 0，重放路径将其当作文件系统 superblock 副本。

use super::types::*;
use crate::error::{Error, ErrorKind, Result};

// v1 布局偏移
const TAG1_OFF_BLOCKNR: usize = 0;
const TAG1_OFF_FLAGS: usize = 6;
const TAG1_OFF_BLOCKNR_HIGH: usize = 8;

// v3 布局偏移
const TAG3_OFF_BLOCKNR: usize = 0;
const TAG3_OFF_FLAGS: usize = 4;
const TAG3_OFF_BLOCKNR_HIGH: usize = 8;

/// v3 标签大小
const TAG3_SIZE: usize = 16;
/// v1 标签基准大小（含 checksum、flags、blocknr_high）
const TAG1_SIZE: usize = 12;

/// 标签大小（不含 UUID 部分）
///
/// CSUM_V3 生效时固定 16 字节；否则 12 字节基准，CSUM_V2 加 2，
/// 非 64BIT 减 4。
pub fn tag_bytes(sb: &JbdSb) -> usize {
    if sb.has_incompat_feature(JBD_FEATURE_INCOMPAT_CSUM_V3) {
        return TAG3_SIZE;
    }

    let mut size = TAG1_SIZE;
    if sb.has_incompat_feature(JBD_FEATURE_INCOMPAT_CSUM_V2) {
        size += 2;
    }
    if sb.is_64bit() {
        return size;
    }
    size - 4
}

/// 单个标签的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    /// 标签指向的原位块号；ESCAPE 标签提取时为 0
    pub block: u64,
    /// ESCAPE 标志
    pub escaped: bool,
    /// 内联 UUID；SAME_UUID 标签为 `None`
    pub uuid: Option<[u8; UUID_SIZE]>,
    /// 是否最后一个标签
    pub last_tag: bool,
    /// 本标签占用的字节数（含 UUID 部分）
    pub tag_bytes: usize,
}

impl TagInfo {
    /// 构造一个待写出的标签
    pub fn new(block: u64, uuid: Option<[u8; UUID_SIZE]>, last_tag: bool) -> Self {
        Self {
            block,
            escaped: false,
            uuid,
            last_tag,
            tag_bytes: 0,
        }
    }
}

/// 从缓冲区开头提取一个标签
///
/// 缓冲区不足以容纳标签（或必需的 UUID 部分）时返回 `InvalidInput`。
pub fn extract_block_tag(sb: &JbdSb, buf: &[u8]) -> Result<TagInfo> {
    let tb = tag_bytes(sb);
    if buf.len() < tb {
        return Err(Error::new(ErrorKind::InvalidInput, "truncated block tag"));
    }

    let (mut block, flags) = if sb.has_incompat_feature(JBD_FEATURE_INCOMPAT_CSUM_V3) {
        let mut block = get_be32(buf, TAG3_OFF_BLOCKNR) as u64;
        if sb.is_64bit() {
            block |= (get_be32(buf, TAG3_OFF_BLOCKNR_HIGH) as u64) << 32;
        }
        (block, get_be32(buf, TAG3_OFF_FLAGS))
    } else {
        let mut block = get_be32(buf, TAG1_OFF_BLOCKNR) as u64;
        if sb.is_64bit() {
            block |= (get_be32(buf, TAG1_OFF_BLOCKNR_HIGH) as u64) << 32;
        }
        (block, get_be16(buf, TAG1_OFF_FLAGS) as u32)
    };

    let escaped = flags & JBD_FLAG_ESCAPE != 0;
    if escaped {
        block = 0;
    }

    let mut consumed = tb;
    let uuid = if flags & JBD_FLAG_SAME_UUID == 0 {
        if buf.len() < tb + UUID_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "truncated tag uuid"));
        }
        let mut uuid = [0u8; UUID_SIZE];
        uuid.copy_from_slice(&buf[tb..tb + UUID_SIZE]);
        consumed += UUID_SIZE;
        Some(uuid)
    } else {
        None
    };

    Ok(TagInfo {
        block,
        escaped,
        uuid,
        last_tag: flags & JBD_FLAG_LAST_TAG != 0,
        tag_bytes: consumed,
    })
}

/// 向缓冲区开头写出一个标签
///
/// 标签区域先清零再填充。返回写出的字节数（含 UUID 部分）；
/// 剩余空间不足时返回 `InvalidInput`，调用方应另起一个描述符块。
pub fn write_block_tag(sb: &JbdSb, buf: &mut [u8], tag: &TagInfo) -> Result<usize> {
    let tb = tag_bytes(sb);
    if buf.len() < tb {
        return Err(Error::new(ErrorKind::InvalidInput, "tag table full"));
    }

    let mut flags = 0u32;
    if tag.escaped {
        flags |= JBD_FLAG_ESCAPE;
    }
    if tag.uuid.is_none() {
        flags |= JBD_FLAG_SAME_UUID;
    }
    if tag.last_tag {
        flags |= JBD_FLAG_LAST_TAG;
    }

    buf[..tb].fill(0);
    if sb.has_incompat_feature(JBD_FEATURE_INCOMPAT_CSUM_V3) {
        put_be32(buf, TAG3_OFF_BLOCKNR, tag.block as u32);
        put_be32(buf, TAG3_OFF_FLAGS, flags);
        if sb.is_64bit() {
            put_be32(buf, TAG3_OFF_BLOCKNR_HIGH, (tag.block >> 32) as u32);
        }
    } else {
        put_be32(buf, TAG1_OFF_BLOCKNR, tag.block as u32);
        put_be16(buf, TAG1_OFF_FLAGS, flags as u16);
        if sb.is_64bit() {
            put_be32(buf, TAG1_OFF_BLOCKNR_HIGH, (tag.block >> 32) as u32);
        }
    }

    let mut consumed = tb;
    if let Some(uuid) = &tag.uuid {
        if buf.len() < tb + UUID_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "tag table full"));
        }
        buf[tb..tb + UUID_SIZE].copy_from_slice(uuid);
        consumed += UUID_SIZE;
    }

    Ok(consumed)
}

/// 描述符块标签迭代器
///
/// 输入为块头之后的标签表。顺序解码每个标签，遇到 LAST_TAG、
/// 解码失败或空间耗尽时结束。CSUM_V2/V3 生效时末尾预留块尾空间。
pub struct TagIter<'a> {
    sb: &'a JbdSb,
    table: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> TagIter<'a> {
    /// 创建迭代器
    ///
    /// # 参数
    ///
    /// * `sb` - journal superblock（决定标签布局）
    /// * `table` - 块头之后的标签表
    pub fn new(sb: &'a JbdSb, table: &'a [u8]) -> Self {
        let mut len = table.len();
        if sb.has_csum() {
            len = len.saturating_sub(JBD_BLOCK_TAIL_SIZE);
        }
        Self {
            sb,
            table: &table[..len],
            pos: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for TagIter<'a> {
    type Item = TagInfo;

    fn next(&mut self) -> Option<TagInfo> {
        if self.done || self.pos >= self.table.len() {
            return None;
        }

        match extract_block_tag(self.sb, &self.table[self.pos..]) {
            Ok(tag) => {
                self.pos += tag.tag_bytes;
                if tag.last_tag {
                    self.done = true;
                }
                Some(tag)
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}
