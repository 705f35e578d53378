//! Shared buffer fan-out across tasks and threads.

use std::time::Duration;
use voicelink::audio::{OverrunPolicy, SharedBuffer};
use voicelink::error::BufferError;

#[tokio::test]
async fn reader_sees_every_write_in_order() {
    let buffer = SharedBuffer::new(64).unwrap();
    let mut reader = buffer.make_reader();
    let writer = buffer.make_writer();

    for i in 0..50u32 {
        writer.write(i).unwrap();
    }
    for i in 0..50u32 {
        assert_eq!(reader.read().await.unwrap(), i);
    }
}

#[tokio::test]
async fn slow_and_fast_readers_see_the_same_sequence() {
    let buffer = SharedBuffer::new(32).unwrap();
    let fast = buffer.make_reader();
    let slow = buffer.make_reader();
    let writer = buffer.make_writer();

    let fast_task = tokio::spawn(async move {
        let mut fast = fast;
        let mut seen = Vec::new();
        while let Ok(v) = fast.read().await {
            seen.push(v);
        }
        seen
    });
    let slow_task = tokio::spawn(async move {
        let mut slow = slow;
        let mut seen = Vec::new();
        while let Ok(v) = slow.read().await {
            seen.push(v);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        seen
    });

    // Writes come from a plain thread, like a platform audio callback.
    std::thread::spawn(move || {
        for i in 0..20u32 {
            writer.write(i).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        writer.finish();
    })
    .join()
    .unwrap();

    let expected: Vec<u32> = (0..20).collect();
    assert_eq!(fast_task.await.unwrap(), expected);
    assert_eq!(slow_task.await.unwrap(), expected);
}

#[tokio::test]
async fn finish_ends_every_reader() {
    let buffer: SharedBuffer<u8> = SharedBuffer::new(4).unwrap();
    let mut waiting = buffer.make_reader();
    let mut idle = buffer.make_reader();
    let writer = buffer.make_writer();

    let pending = tokio::spawn(async move { waiting.read().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    writer.finish();

    assert_eq!(pending.await.unwrap(), Err(BufferError::WriterFinished));
    assert_eq!(idle.read().await, Err(BufferError::WriterFinished));
    assert_eq!(idle.read().await, Err(BufferError::WriterFinished));
}

#[tokio::test]
async fn superseded_writer_cannot_write() {
    let buffer = SharedBuffer::new(4).unwrap();
    let mut reader = buffer.make_reader();
    let old = buffer.make_writer();
    let new = buffer.make_writer();

    assert_eq!(old.write(1), Err(BufferError::WritePermissionDenied));
    new.write(2).unwrap();
    assert_eq!(reader.read().await.unwrap(), 2);
}

#[tokio::test]
async fn lagging_reader_is_told_under_report_policy() {
    let buffer = SharedBuffer::with_overrun_policy(4, OverrunPolicy::Report).unwrap();
    let mut reader = buffer.make_reader();
    let writer = buffer.make_writer();
    for i in 0..10u32 {
        writer.write(i).unwrap();
    }

    assert_eq!(
        reader.read().await,
        Err(BufferError::Overrun { lagged: 6 })
    );
    assert_eq!(reader.read().await.unwrap(), 6);
}
