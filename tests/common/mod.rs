//! 场景测试共用设施：内存块设备、线性 journal inode 映射、
//! 日志镜像搭建辅助。
#![allow(dead_code)]

use jbd_core::consts::*;
use jbd_core::journal::{
    tag_bytes, write_block_tag, BlockHeader, JbdSb, RevokeHeader, TagInfo, JBD_BHDR_SIZE,
    JBD_COMMIT_BLOCK, JBD_DESCRIPTOR_BLOCK, JBD_REVOKE_BLOCK, JBD_REVOKE_HEADER_SIZE,
};
use jbd_core::{BlockDev, BlockDevice, Error, ErrorKind, ExtSuperblock, InodeBlockMap, Result};

/// 测试设备块大小
pub const BLOCK_SIZE: usize = 4096;
/// 测试设备总块数
pub const TOTAL_BLOCKS: u64 = 2048;
/// journal inode 的数据在设备上的起始物理块
pub const JOURNAL_BASE: u64 = 64;

/// 内存块设备，记录物理读写次数，可注入写失败
#[derive(Clone)]
pub struct MockDevice {
    pub storage: Vec<u8>,
    pub reads: u64,
    pub writes: u64,
    pub fail_writes: bool,
}

impl MockDevice {
    pub fn new(total_blocks: u64) -> Self {
        Self {
            storage: vec![0u8; (total_blocks * BLOCK_SIZE as u64) as usize],
            reads: 0,
            writes: 0,
            fail_writes: false,
        }
    }
}

impl BlockDevice for MockDevice {
    fn block_size(&self) -> u32 {
        BLOCK_SIZE as u32
    }

    fn sector_size(&self) -> u32 {
        512
    }

    fn total_blocks(&self) -> u64 {
        (self.storage.len() / BLOCK_SIZE) as u64
    }

    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        self.reads += 1;
        let start = (lba * 512) as usize;
        let len = (count * 512) as usize;
        buf[..len].copy_from_slice(&self.storage[start..start + len]);
        Ok(len)
    }

    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        if self.fail_writes {
            return Err(Error::new(ErrorKind::Io, "injected write failure"));
        }
        self.writes += 1;
        let start = (lba * 512) as usize;
        let len = (count * 512) as usize;
        self.storage[start..start + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }
}

/// journal inode 的块连续放在 `JOURNAL_BASE` 起的物理块上
pub struct LinearMap;

impl<D: BlockDevice> InodeBlockMap<D> for LinearMap {
    fn dblk_idx(&mut self, _bdev: &mut BlockDev<D>, iblock: u32) -> Result<u64> {
        Ok(JOURNAL_BASE + iblock as u64)
    }
}

/// 搭起一个带 journal 的测试文件系统
///
/// 返回块设备、内存中的 ext4 superblock 和 journal superblock，
/// 两个 superblock 都已写到设备上。
pub fn setup(
    maxlen: u32,
    sequence: u32,
    start: u32,
    fs_incompat: u32,
) -> (BlockDev<MockDevice>, ExtSuperblock, JbdSb) {
    let mut bdev = BlockDev::new_with_cache(MockDevice::new(TOTAL_BLOCKS), 64).unwrap();

    let mut fs_sb = ExtSuperblock::default();
    fs_sb.set_features_compatible(EXT4_FEATURE_COMPAT_HAS_JOURNAL);
    fs_sb.set_journal_inode_number(8);
    fs_sb.set_features_incompatible(fs_incompat);
    fs_sb.write(&mut bdev).unwrap();

    let mut jsb = JbdSb::default();
    jsb.set_maxlen(maxlen);
    jsb.set_first(1);
    jsb.set_sequence(sequence);
    jsb.set_start(start);
    jsb.set_uuid(&[0x42; 16]);
    write_journal_sb(&mut bdev, &jsb);

    (bdev, fs_sb, jsb)
}

/// 把 journal superblock 写到设备上（journal 第 0 块）
pub fn write_journal_sb(bdev: &mut BlockDev<MockDevice>, jsb: &JbdSb) {
    bdev.write_bytes_direct(JOURNAL_BASE * BLOCK_SIZE as u64, jsb.as_bytes())
        .unwrap();
}

/// 从设备读回 journal superblock
pub fn read_journal_sb(bdev: &mut BlockDev<MockDevice>) -> JbdSb {
    let mut raw = vec![0u8; 1024];
    bdev.read_bytes_direct(JOURNAL_BASE * BLOCK_SIZE as u64, &mut raw)
        .unwrap();
    JbdSb::from_bytes(&raw).unwrap()
}

/// 把一个块写到 journal 的逻辑位置 `iblock`
pub fn write_jblock(bdev: &mut BlockDev<MockDevice>, iblock: u32, data: &[u8]) {
    bdev.write_blocks_direct(JOURNAL_BASE + iblock as u64, 1, data)
        .unwrap();
}

/// 直接读出设备上一个块的内容
pub fn read_block_raw(bdev: &mut BlockDev<MockDevice>, lba: u64) -> Vec<u8> {
    let mut data = vec![0u8; BLOCK_SIZE];
    bdev.read_blocks_direct(lba, 1, &mut data).unwrap();
    data
}

/// 构造一个描述符块，目标依次为 `targets`（首个标签带 UUID）
pub fn desc_block(jsb: &JbdSb, sequence: u32, targets: &[u64]) -> Vec<u8> {
    assert!(!targets.is_empty());
    let mut data = vec![0u8; BLOCK_SIZE];
    BlockHeader::new(JBD_DESCRIPTOR_BLOCK, sequence).write_to(&mut data);

    let uuid = jsb.uuid();
    let mut off = JBD_BHDR_SIZE;
    for (i, &target) in targets.iter().enumerate() {
        let tag = TagInfo::new(
            target,
            if i == 0 { Some(uuid) } else { None },
            i == targets.len() - 1,
        );
        off += write_block_tag(jsb, &mut data[off..], &tag).unwrap();
    }
    assert!(off <= BLOCK_SIZE - tag_bytes(jsb));
    data
}

/// 构造一个提交块
pub fn commit_block(sequence: u32) -> Vec<u8> {
    let mut data = vec![0u8; BLOCK_SIZE];
    BlockHeader::new(JBD_COMMIT_BLOCK, sequence).write_to(&mut data);
    data
}

/// 构造一个撤销块（32 位记录）
pub fn revoke_block(sequence: u32, lbas: &[u64]) -> Vec<u8> {
    let mut data = vec![0u8; BLOCK_SIZE];
    let count = (JBD_REVOKE_HEADER_SIZE + lbas.len() * 4) as u32;
    RevokeHeader {
        header: BlockHeader::new(JBD_REVOKE_BLOCK, sequence),
        count,
    }
    .write_to(&mut data);

    let mut off = JBD_REVOKE_HEADER_SIZE;
    for &lba in lbas {
        data[off..off + 4].copy_from_slice(&(lba as u32).to_be_bytes());
        off += 4;
    }
    data
}

/// 构造一个填满 `byte` 的数据块
pub fn data_block(byte: u8) -> Vec<u8> {
    vec![byte; BLOCK_SIZE]
}
