//! jbd_core: 纯 Rust 实现的 JBD (ext3/ext4) 日志子系统
//!
//! 这是一个纯 Rust 实现的元数据日志库，与 Linux ext3/ext4 共享的
//! JBD 磁盘格式位兼容，旨在提供：
//! - **零 unsafe 代码**
//! - **Rust 惯用风格**的 API
//! - **崩溃一致性**：块级修改先写入日志，再写回原位
//!
//! # 核心流程
//!
//! ```rust,ignore
//! use jbd_core::{BlockDev, ExtSuperblock, JbdFs, JbdJournal};
//!
//! // 1. mount 时加载 journal 并执行崩溃恢复
//! let mut fs_sb = ExtSuperblock::load(&mut bdev)?;
//! let mut jbd_fs = JbdFs::get(&mut bdev, &fs_sb, map)?;
//! jbd_fs.recover(&mut bdev, &mut fs_sb)?;
//!
//! // 2. 启动 journal 会话
//! let mut journal = JbdJournal::start(&mut jbd_fs, &mut bdev, &mut fs_sb)?;
//!
//! // 3. 事务：修改块 -> 标脏 -> 提交
//! let mut trans = journal.new_trans();
//! journal.get_access(&mut jbd_fs, &mut bdev, &trans, 1000)?;
//! // ... 通过 Block 句柄修改块 1000 ...
//! journal.set_block_dirty(&mut bdev, &mut trans, 1000)?;
//! journal.submit_trans(trans);
//! journal.commit_all(&mut jbd_fs, &mut bdev)?;
//!
//! // 4. unmount 时停止会话（驱动所有检查点完成）
//! journal.stop(&mut jbd_fs, &mut bdev, &mut fs_sb)?;
//! jbd_fs.put(&mut bdev)?;
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象和块句柄
//! - [`cache`] - 块缓存（引用计数、脏标志、写完成标记）
//! - [`fs`] - 宿主文件系统契约（ext4 superblock 访问器、inode 块映射）
//! - [`consts`] - ext4 侧常量定义
//! - [`journal`] - JBD 日志核心（磁盘格式、事务、提交、检查点、恢复）

#![no_std]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 块缓存
pub mod cache;

/// 常量定义
pub mod consts;

/// 宿主文件系统契约
pub mod fs;

/// Journal (JBD) 系统
pub mod journal;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{Block, BlockDev, BlockDevice};

// 缓存
pub use cache::{
    BlockCache, CacheBuffer, CacheFlags, CacheStats, EndWrite, WriteCompletion, DEFAULT_CACHE_SIZE,
};

// 文件系统契约
pub use fs::{ExtSuperblock, InodeBlockMap};

// Journal
pub use journal::{JbdFs, JbdJournal, JbdTrans};
