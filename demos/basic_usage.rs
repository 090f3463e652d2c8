//! Basic usage example for the mmring persistent ring buffer
//!
//! This example demonstrates:
//! 1. Opening a buffer file and writing length-prefixed records
//! 2. Reading records back in FIFO order
//! 3. Reopening the same file and resuming where the queue left off
//! 4. Oldest-record eviction when the buffer overflows
//!
//! The example uses a file in the system temporary directory which is
//! removed at the end.

use mmring::{BufferError, MemMapRingBuffer, RecordMode};

fn main() -> Result<(), BufferError> {
    let path = std::env::temp_dir().join("mmring_example.dat");
    println!("Using buffer file at: {:?}", path);

    // Write a handful of records and read one back.
    {
        let mut buffer = MemMapRingBuffer::open(&path, 1024, RecordMode::Variable)?;

        for message in ["first message", "second message", "third message"] {
            buffer.put(message.as_bytes())?;
        }
        println!("Queued {} records", buffer.len());

        let front = buffer.get()?;
        println!("Read back: {}", String::from_utf8_lossy(&front));

        // Make sure the cursors reach stable storage before "restarting".
        buffer.flush()?;
    }

    // Reopen the file: the remaining records are still queued, in order.
    {
        let mut buffer = MemMapRingBuffer::open(&path, 1024, RecordMode::Variable)?;
        println!("After reopen, {} records remain", buffer.len());

        while let Ok(record) = buffer.get() {
            println!("Read back: {}", String::from_utf8_lossy(&record));
        }
    }

    // Overflow a tiny buffer: the oldest records are silently dropped.
    {
        let mut buffer = MemMapRingBuffer::open(&path, 1024, RecordMode::Variable)?;
        buffer.clear();

        for i in 0..100 {
            let message = format!("overflow record {i}");
            buffer.put(message.as_bytes())?;
        }
        println!("After 100 inserts, {} records retained", buffer.len());

        let oldest_retained = buffer.get()?;
        println!(
            "Oldest retained record: {}",
            String::from_utf8_lossy(&oldest_retained)
        );
    }

    std::fs::remove_file(&path).ok();
    println!("Done");
    Ok(())
}
