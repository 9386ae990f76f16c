//! 崩溃恢复场景测试
//!
//! 日志镜像由测试直接用磁盘格式铺出来，覆盖：干净日志、单事务
//! 重放、撤销优先级、环形回绕和整圈扫描终止。

mod common;

use common::*;
use jbd_core::consts::EXT4_FINCOM_RECOVER;
use jbd_core::JbdFs;

#[test]
fn clean_log_recovers_without_reading_past_superblock() {
    // start == 0：日志干净
    let (mut bdev, mut fs_sb, _) = setup(16, 1, 0, 0);

    let mut jbd_fs = JbdFs::get(&mut bdev, &fs_sb, LinearMap).unwrap();
    let reads_after_mount = bdev.device().reads;

    jbd_fs.recover(&mut bdev, &mut fs_sb).unwrap();

    // 没有继续读日志，RECOVER 标志保持原样（本来就是 0）
    assert_eq!(bdev.device().reads, reads_after_mount);
    assert_eq!(fs_sb.features_incompatible() & EXT4_FINCOM_RECOVER, 0);
}

#[test]
fn single_transaction_replay() {
    let (mut bdev, mut fs_sb, jsb) = setup(16, 7, 1, EXT4_FINCOM_RECOVER);

    // 日志：描述符(seq 7, 目标 1000) + 数据副本 + 提交(seq 7)
    write_jblock(&mut bdev, 1, &desc_block(&jsb, 7, &[1000]));
    write_jblock(&mut bdev, 2, &data_block(0xD7));
    write_jblock(&mut bdev, 3, &commit_block(7));

    let mut jbd_fs = JbdFs::get(&mut bdev, &fs_sb, LinearMap).unwrap();
    jbd_fs.recover(&mut bdev, &mut fs_sb).unwrap();

    // 日志副本已写回原位
    assert_eq!(read_block_raw(&mut bdev, 1000), data_block(0xD7));

    // start 清零、RECOVER 标志清除，两者都已持久化
    assert_eq!(jbd_fs.start(), 0);
    assert_eq!(fs_sb.features_incompatible() & EXT4_FINCOM_RECOVER, 0);

    jbd_fs.put(&mut bdev).unwrap();
    assert_eq!(read_journal_sb(&mut bdev).start(), 0);

    let on_disk = jbd_core::ExtSuperblock::load(&mut bdev).unwrap();
    assert_eq!(on_disk.features_incompatible() & EXT4_FINCOM_RECOVER, 0);
}

#[test]
fn revoke_suppresses_older_copies_only() {
    let (mut bdev, mut fs_sb, jsb) = setup(16, 7, 1, EXT4_FINCOM_RECOVER);

    // 原位块 1001 的初始内容，不应被事务 7 的副本覆盖
    bdev.write_blocks_direct(1001, 1, &data_block(0x11)).unwrap();

    // 事务 7：写 1000 和 1001
    write_jblock(&mut bdev, 1, &desc_block(&jsb, 7, &[1000, 1001]));
    write_jblock(&mut bdev, 2, &data_block(0x70));
    write_jblock(&mut bdev, 3, &data_block(0x71));
    write_jblock(&mut bdev, 4, &commit_block(7));
    // 事务 8：撤销 1000 和 1001
    write_jblock(&mut bdev, 5, &revoke_block(8, &[1000, 1001]));
    write_jblock(&mut bdev, 6, &commit_block(8));
    // 事务 9：重新写 1000
    write_jblock(&mut bdev, 7, &desc_block(&jsb, 9, &[1000]));
    write_jblock(&mut bdev, 8, &data_block(0x90));
    write_jblock(&mut bdev, 9, &commit_block(9));

    let mut jbd_fs = JbdFs::get(&mut bdev, &fs_sb, LinearMap).unwrap();
    jbd_fs.recover(&mut bdev, &mut fs_sb).unwrap();

    // 事务 9 >= 撤销事务 8：副本生效
    assert_eq!(read_block_raw(&mut bdev, 1000), data_block(0x90));
    // 事务 7 < 撤销事务 8：副本被压制，原始内容保留
    assert_eq!(read_block_raw(&mut bdev, 1001), data_block(0x11));
}

#[test]
fn circular_log_wraps_through_descriptor() {
    // 日志区 [1, 16)，日志从 13 起跨越 13,14,15,1,2
    let (mut bdev, mut fs_sb, jsb) = setup(16, 5, 13, EXT4_FINCOM_RECOVER);

    write_jblock(&mut bdev, 13, &desc_block(&jsb, 5, &[1001, 1002, 1003]));
    write_jblock(&mut bdev, 14, &data_block(0xA1));
    write_jblock(&mut bdev, 15, &data_block(0xA2));
    write_jblock(&mut bdev, 1, &data_block(0xA3)); // 回绕
    write_jblock(&mut bdev, 2, &commit_block(5));

    let mut jbd_fs = JbdFs::get(&mut bdev, &fs_sb, LinearMap).unwrap();
    jbd_fs.recover(&mut bdev, &mut fs_sb).unwrap();

    assert_eq!(read_block_raw(&mut bdev, 1001), data_block(0xA1));
    assert_eq!(read_block_raw(&mut bdev, 1002), data_block(0xA2));
    assert_eq!(read_block_raw(&mut bdev, 1003), data_block(0xA3));
    assert_eq!(jbd_fs.start(), 0);
}

#[test]
fn scan_stops_after_full_lap() {
    // 整个日志区填满连续的单块事务（提交块），绕一整圈后终止
    let (mut bdev, mut fs_sb, _) = setup(16, 5, 13, EXT4_FINCOM_RECOVER);

    let mut seq = 5;
    let mut iblock = 13;
    for _ in 0..15 {
        write_jblock(&mut bdev, iblock, &commit_block(seq));
        seq += 1;
        iblock = if iblock + 1 >= 16 { 1 } else { iblock + 1 };
    }

    let mut jbd_fs = JbdFs::get(&mut bdev, &fs_sb, LinearMap).unwrap();
    jbd_fs.recover(&mut bdev, &mut fs_sb).unwrap();
    assert_eq!(jbd_fs.start(), 0);
}

#[test]
fn sequence_break_ends_scan() {
    let (mut bdev, mut fs_sb, jsb) = setup(16, 7, 1, EXT4_FINCOM_RECOVER);

    // 有效的事务 7，后面跟一个序列号不符的提交块（旧日志残留）
    write_jblock(&mut bdev, 1, &desc_block(&jsb, 7, &[1000]));
    write_jblock(&mut bdev, 2, &data_block(0x77));
    write_jblock(&mut bdev, 3, &commit_block(7));
    write_jblock(&mut bdev, 4, &commit_block(3));

    let mut jbd_fs = JbdFs::get(&mut bdev, &fs_sb, LinearMap).unwrap();
    jbd_fs.recover(&mut bdev, &mut fs_sb).unwrap();

    assert_eq!(read_block_raw(&mut bdev, 1000), data_block(0x77));
}

#[test]
fn mount_rejects_bad_journal_superblock() {
    let (mut bdev, fs_sb, _) = setup(16, 1, 0, 0);

    // 破坏 journal superblock 的 magic
    write_jblock(&mut bdev, 0, &data_block(0x00));

    assert!(JbdFs::get(&mut bdev, &fs_sb, LinearMap).is_err());
}
