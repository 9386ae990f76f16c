//! ext4 侧常量定义
//!
//! 日志子系统需要触碰的宿主文件系统常量。

/// ext4 superblock 在设备上的字节偏移
pub const EXT4_SUPERBLOCK_OFFSET: u64 = 1024;

/// ext4 superblock 大小（字节）
pub const EXT4_SUPERBLOCK_SIZE: usize = 1024;

/// ext4 superblock magic (0xEF53)
pub const EXT4_SUPERBLOCK_MAGIC: u16 = 0xEF53;

/// Compat 特性：文件系统带有 journal
pub const EXT4_FEATURE_COMPAT_HAS_JOURNAL: u32 = 0x0004;

/// Incompat 特性：journal 需要恢复
///
/// mount 并开启 journal 会话时置位，干净 unmount 或恢复成功后清除。
pub const EXT4_FINCOM_RECOVER: u32 = 0x0004;
