//! 块句柄 - RAII 风格的块访问
//!
//! 持有期间缓存块引用计数 > 0，不会被驱逐；修改自动标脏；
//! 丢弃时自动释放引用（带 FLUSH 标志的脏块此时写穿到设备）。
//! 由于句柄持有设备的可变引用，同一时刻只能存在一个句柄。

use crate::block::{BlockDev, BlockDevice};
use crate::error::Result;

/// 块句柄
///
/// # 示例
///
/// ```rust,ignore
/// // 读取块
/// let mut block = Block::get(&mut block_dev, 0)?;
/// block.with_data(|data| {
///     let first = data[0];
/// })?;
///
/// // 修改块
/// let mut block = Block::get(&mut block_dev, 1)?;
/// block.with_data_mut(|data| {
///     data[0] = 0x42;
/// })?;
/// // 超出作用域时自动释放引用，脏块最终会写回
/// ```
pub struct Block<'a, D: BlockDevice> {
    block_dev: &'a mut BlockDev<D>,
    lba: u64,
    held: bool,
}

impl<'a, D: BlockDevice> Block<'a, D> {
    /// 获取块（读取数据）
    ///
    /// 在缓存中定位块；缓存未命中时从设备读入。
    pub fn get(block_dev: &'a mut BlockDev<D>, lba: u64) -> Result<Self> {
        block_dev.get_buf(lba, true)?;
        Ok(Self {
            block_dev,
            lba,
            held: true,
        })
    }

    /// 获取块（不读取数据）
    ///
    /// 在缓存中给 LBA 预留一个槽位。调用者将立即覆盖整个块，
    /// 因此不从设备读入旧数据。
    pub fn get_noread(block_dev: &'a mut BlockDev<D>, lba: u64) -> Result<Self> {
        block_dev.get_buf(lba, false)?;
        Ok(Self {
            block_dev,
            lba,
            held: true,
        })
    }

    /// 获取逻辑块地址
    pub fn lba(&self) -> u64 {
        self.lba
    }

    /// 访问块数据（只读）
    pub fn with_data<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        self.block_dev.with_buf_data(self.lba, f)
    }

    /// 访问块数据（可写），自动标记为脏
    pub fn with_data_mut<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        self.block_dev.with_buf_data_mut(self.lba, f)
    }

    /// 标记该块写穿（释放最后一个引用时立即写盘）
    pub fn mark_flush(&mut self) {
        self.block_dev.buf_set_flush(self.lba);
    }

    /// 手动释放块（消费 self）
    ///
    /// 通常不需要手动调用，Drop 会自动处理；需要观察写穿结果时使用。
    pub fn release(mut self) -> Result<()> {
        self.do_release()
    }

    fn do_release(&mut self) -> Result<()> {
        if self.held {
            self.held = false;
            self.block_dev.put_buf(self.lba)?;
        }
        Ok(())
    }
}

impl<'a, D: BlockDevice> Drop for Block<'a, D> {
    fn drop(&mut self) {
        // drop 不能返回 Result
        let _ = self.do_release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    struct MockDevice {
        storage: Vec<u8>,
    }

    impl MockDevice {
        fn new(total_blocks: u64) -> Self {
            Self {
                storage: vec![0u8; (total_blocks * 4096) as usize],
            }
        }
    }

    impl BlockDevice for MockDevice {
        fn block_size(&self) -> u32 {
            4096
        }

        fn sector_size(&self) -> u32 {
            512
        }

        fn total_blocks(&self) -> u64 {
            (self.storage.len() / 4096) as u64
        }

        fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
            let start = (lba * 512) as usize;
            let len = (count * 512) as usize;
            buf[..len].copy_from_slice(&self.storage[start..start + len]);
            Ok(len)
        }

        fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
            let start = (lba * 512) as usize;
            let len = (count * 512) as usize;
            self.storage[start..start + len].copy_from_slice(&buf[..len]);
            Ok(len)
        }
    }

    #[test]
    fn test_block_get_and_modify() {
        let mut block_dev = BlockDev::new(MockDevice::new(100)).unwrap();

        {
            let mut block = Block::get(&mut block_dev, 0).unwrap();
            assert_eq!(block.lba(), 0);
            block
                .with_data_mut(|data| {
                    data[0] = 0x42;
                    data[1] = 0x43;
                })
                .unwrap();
        } // 自动释放

        // 修改应该还在缓存中
        {
            let mut block = Block::get(&mut block_dev, 0).unwrap();
            block
                .with_data(|data| {
                    assert_eq!(data[0], 0x42);
                    assert_eq!(data[1], 0x43);
                })
                .unwrap();
        }
    }

    #[test]
    fn test_block_get_noread_flush_through() {
        let mut block_dev = BlockDev::new(MockDevice::new(100)).unwrap();

        let mut block = Block::get_noread(&mut block_dev, 10).unwrap();
        block.with_data_mut(|data| data.fill(0xFF)).unwrap();
        block.mark_flush();
        block.release().unwrap();

        // FLUSH 脏块在释放时写穿
        let mut on_disk = vec![0u8; 4096];
        block_dev.read_blocks_direct(10, 1, &mut on_disk).unwrap();
        assert!(on_disk.iter().all(|&b| b == 0xFF));
        assert!(!block_dev.buf_is_dirty(10));
    }

    #[test]
    fn test_block_auto_drop_releases_ref() {
        let mut block_dev = BlockDev::new(MockDevice::new(100)).unwrap();

        {
            let _block = Block::get(&mut block_dev, 0).unwrap();
        }

        // 引用已释放，可以再次获取
        let _block = Block::get(&mut block_dev, 0).unwrap();
    }
}
