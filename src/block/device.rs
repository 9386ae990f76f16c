//! 块设备核心类型

use alloc::vec;
use alloc::vec::Vec;

use crate::cache::{BlockCache, CacheStats, EndWrite, WriteCompletion, DEFAULT_CACHE_SIZE};
use crate::error::{Error, ErrorKind, Result};

/// 块设备接口
///
/// 实现此 trait 以提供底层块设备访问。
///
/// # 示例
///
/// ```rust,ignore
/// use jbd_core::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn block_size(&self) -> u32 {
///         4096
///     }
///
///     fn sector_size(&self) -> u32 {
///         512
///     }
///
///     fn total_blocks(&self) -> u64 {
///         1000000
///     }
///
///     fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         # unimplemented!()
///     }
///
///     fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         // 实现扇区写入
///         # unimplemented!()
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 逻辑块大小（通常 4096）
    fn block_size(&self) -> u32;

    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32;

    /// 总块数
    fn total_blocks(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 逻辑块地址（以扇区为单位）
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 逻辑块地址（以扇区为单位）
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * sector_size）
    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;

    /// 刷新设备缓存
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 块设备包装器
///
/// 为日志子系统提供带缓存的块级访问。缓存是必备的：日志的写序
/// 保证（先日志、后原位）依赖缓存的脏标志、写穿标志和写完成标记。
pub struct BlockDev<D> {
    /// 底层设备
    device: D,
    /// 分区偏移（字节）
    partition_offset: u64,
    /// 块缓存
    bcache: BlockCache,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建新的块设备包装器（默认缓存大小）
    pub fn new(device: D) -> Result<Self> {
        Self::new_with_cache(device, DEFAULT_CACHE_SIZE)
    }

    /// 创建指定缓存容量的块设备包装器
    ///
    /// # 参数
    ///
    /// * `device` - 底层块设备
    /// * `cache_blocks` - 缓存块数量
    pub fn new_with_cache(device: D, cache_blocks: usize) -> Result<Self> {
        let block_size = device.block_size();
        let sector_size = device.sector_size();

        if block_size % sector_size != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "block size must be a multiple of sector size",
            ));
        }

        let bcache = BlockCache::new(cache_blocks, block_size as usize);
        Ok(Self {
            device,
            partition_offset: 0,
            bcache,
        })
    }

    /// 获取底层设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 获取底层设备的可变引用
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 获取逻辑块大小
    pub fn block_size(&self) -> u32 {
        self.device.block_size()
    }

    /// 获取总块数
    pub fn total_blocks(&self) -> u64 {
        self.device.total_blocks()
    }

    /// 设置分区偏移（字节）
    pub fn set_partition_offset(&mut self, offset: u64) {
        self.partition_offset = offset;
    }

    /// 缓存统计信息
    pub fn cache_stats(&self) -> CacheStats {
        self.bcache.stats()
    }

    /// 将逻辑块地址转换为物理扇区地址
    fn logical_to_physical(&self, lba: u64) -> u64 {
        let block_size = self.device.block_size() as u64;
        let sector_size = self.device.sector_size() as u64;
        (lba * block_size + self.partition_offset) / sector_size
    }

    /// 每个逻辑块包含的物理扇区数
    fn sectors_per_block(&self) -> u32 {
        self.device.block_size() / self.device.sector_size()
    }

    // ===== 直接访问接口（绕过缓存）=====

    /// 直接读取块（绕过缓存）
    pub fn read_blocks_direct(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let block_size = self.device.block_size();
        let required = count as usize * block_size as usize;

        if buf.len() < required {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer too small for requested blocks",
            ));
        }

        let pba = self.logical_to_physical(lba);
        let sector_count = count * self.sectors_per_block();
        self.device.read_blocks(pba, sector_count, buf)
    }

    /// 直接写入块（绕过缓存）
    pub fn write_blocks_direct(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        let block_size = self.device.block_size();
        let required = count as usize * block_size as usize;

        if buf.len() < required {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer too small for requested blocks",
            ));
        }

        let pba = self.logical_to_physical(lba);
        let sector_count = count * self.sectors_per_block();
        self.device.write_blocks(pba, sector_count, buf)
    }

    /// 直接读取字节（绕过缓存）
    ///
    /// # 参数
    ///
    /// * `offset` - 字节偏移量
    /// * `buf` - 目标缓冲区
    pub fn read_bytes_direct(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let block_size = self.device.block_size() as u64;

        let start_block = offset / block_size;
        let block_offset = (offset % block_size) as usize;

        let total = block_offset + len;
        let block_count = (total as u64).div_ceil(block_size) as u32;

        let mut temp = vec![0u8; block_count as usize * block_size as usize];
        self.read_blocks_direct(start_block, block_count, &mut temp)?;
        buf.copy_from_slice(&temp[block_offset..block_offset + len]);

        Ok(len)
    }

    /// 直接写入字节（绕过缓存）
    ///
    /// # 参数
    ///
    /// * `offset` - 字节偏移量
    /// * `buf` - 源数据缓冲区
    pub fn write_bytes_direct(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        let len = buf.len();
        let block_size = self.device.block_size() as u64;

        let start_block = offset / block_size;
        let block_offset = (offset % block_size) as usize;

        let total = block_offset + len;
        let block_count = (total as u64).div_ceil(block_size) as u32;

        let mut temp = vec![0u8; block_count as usize * block_size as usize];

        // 非整块写需要先读出现有内容
        if block_offset != 0 || len % block_size as usize != 0 {
            self.read_blocks_direct(start_block, block_count, &mut temp)?;
        }

        temp[block_offset..block_offset + len].copy_from_slice(buf);
        self.write_blocks_direct(start_block, block_count, &temp)?;

        Ok(len)
    }

    // ===== 缓存块接口 =====

    /// 在缓存中定位一个块，必要时从设备读入
    ///
    /// `read == false` 时只在缓存中占位（调用者将立即覆盖整个块），
    /// 不访问设备。两种情况都会增加引用计数。
    pub(crate) fn get_buf(&mut self, lba: u64, read: bool) -> Result<()> {
        let needs_read = {
            let (buf, _) = self.bcache.alloc(lba);
            buf.inc_ref();
            if !read {
                buf.mark_uptodate();
            }
            read && !buf.is_uptodate()
        };

        if needs_read {
            let block_size = self.device.block_size() as usize;
            let pba = self.logical_to_physical(lba);
            let count = self.sectors_per_block();

            let mut temp = vec![0u8; block_size];
            if let Err(e) = self.device.read_blocks(pba, count, &mut temp) {
                // 读失败回退引用，调用方不会持有句柄
                if let Some(buf) = self.bcache.peek_mut(lba) {
                    buf.dec_ref();
                }
                return Err(e);
            }

            let buf = self.bcache.peek_mut(lba).expect("pinned");
            buf.data.copy_from_slice(&temp);
            buf.mark_uptodate();
        }
        Ok(())
    }

    /// 释放一个缓存块引用
    ///
    /// 最后一个引用释放且块带 FLUSH 脏标志时写穿到设备。
    pub(crate) fn put_buf(&mut self, lba: u64) -> Result<()> {
        let needs_writeback = {
            let Some(buf) = self.bcache.peek_mut(lba) else {
                return Ok(());
            };
            buf.dec_ref();
            buf.ref_count() == 0 && buf.needs_flush() && buf.is_dirty()
        };

        if needs_writeback {
            if let Some(comp) = self.flush_lba(lba)? {
                if comp.tag != EndWrite::None {
                    // 日志从不给原位缓冲区设置 FLUSH，这里不应出现日志标记
                    log::warn!("journal-tagged buffer {} written through on release", lba);
                }
                comp.result?;
            }
        }
        Ok(())
    }

    /// 缓存块是否为脏
    pub fn buf_is_dirty(&self, lba: u64) -> bool {
        self.bcache.peek(lba).map(|b| b.is_dirty()).unwrap_or(false)
    }

    /// 标记缓存块为脏
    pub fn buf_set_dirty(&mut self, lba: u64) {
        self.bcache.mark_dirty(lba);
    }

    /// 清除缓存块的脏标志
    pub fn buf_clear_dirty(&mut self, lba: u64) {
        self.bcache.clear_dirty(lba);
    }

    /// 标记缓存块为写穿
    pub fn buf_set_flush(&mut self, lba: u64) {
        if let Some(buf) = self.bcache.peek_mut(lba) {
            buf.mark_flush();
        }
    }

    /// 增加缓存块引用计数（块必须已在缓存中）
    pub fn buf_inc_ref(&mut self, lba: u64) {
        if let Some(buf) = self.bcache.peek_mut(lba) {
            buf.inc_ref();
        }
    }

    /// 释放缓存块引用计数
    pub fn buf_release(&mut self, lba: u64) -> Result<()> {
        self.put_buf(lba)
    }

    /// 缓存块的写完成标记
    pub fn buf_end_write(&self, lba: u64) -> EndWrite {
        self.bcache
            .peek(lba)
            .map(|b| b.end_write())
            .unwrap_or(EndWrite::None)
    }

    /// 设置缓存块的写完成标记
    pub fn buf_set_end_write(&mut self, lba: u64, tag: EndWrite) {
        if let Some(buf) = self.bcache.peek_mut(lba) {
            buf.set_end_write(tag);
        }
    }

    /// 读出缓存块数据的副本（块必须已在缓存中且有效）
    pub fn buf_data(&self, lba: u64) -> Result<Vec<u8>> {
        match self.bcache.peek(lba) {
            Some(buf) if buf.is_uptodate() => Ok(buf.data.clone()),
            _ => Err(Error::new(ErrorKind::InvalidState, "block not cached")),
        }
    }

    /// 只读访问缓存块数据
    pub(crate) fn with_buf_data<R>(&self, lba: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        match self.bcache.peek(lba) {
            Some(buf) => Ok(f(&buf.data)),
            None => Err(Error::new(ErrorKind::InvalidState, "block not cached")),
        }
    }

    /// 可写访问缓存块数据，并标记为脏
    pub(crate) fn with_buf_data_mut<R>(
        &mut self,
        lba: u64,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let r = match self.bcache.peek_mut(lba) {
            Some(buf) => f(&mut buf.data),
            None => return Err(Error::new(ErrorKind::InvalidState, "block not cached")),
        };
        self.bcache.mark_dirty(lba);
        Ok(r)
    }

    // ===== flush 接口 =====

    /// 将一个脏缓存块写回设备
    ///
    /// 返回本次写回的 [`WriteCompletion`]（块不存在或不脏时为 `None`）。
    /// 调用方必须处理完成标记——日志的检查点推进依赖它。
    pub fn flush_lba(&mut self, lba: u64) -> Result<Option<WriteCompletion>> {
        let data = {
            let Some(buf) = self.bcache.peek(lba) else {
                return Ok(None);
            };
            if !buf.is_dirty() {
                return Ok(None);
            }
            buf.data.clone()
        };

        let pba = self.logical_to_physical(lba);
        let count = self.sectors_per_block();
        let result = self.device.write_blocks(pba, count, &data).map(|_| ());

        let buf = self.bcache.peek_mut(lba).expect("checked above");
        let tag = buf.take_end_write();
        if result.is_ok() {
            buf.clear_dirty();
            self.bcache.note_writeback(lba);
        }

        Ok(Some(WriteCompletion { lba, tag, result }))
    }

    /// 将所有脏缓存块写回设备
    ///
    /// 返回每个被写块的完成记录，顺序为块地址升序。
    pub fn flush_all(&mut self) -> Result<Vec<WriteCompletion>> {
        let mut completions = Vec::new();
        for lba in self.bcache.dirty_lbas() {
            if let Some(comp) = self.flush_lba(lba)? {
                completions.push(comp);
            }
        }
        Ok(completions)
    }
}
