//! StreamBuffer ordering under a concurrent producer

use std::sync::Arc;
use std::thread;

use rustycir::StreamBuffer;

#[test]
fn test_fifo_across_takes() {
    let buffer = StreamBuffer::new(64);
    let data: Vec<u8> = (0..20).collect();
    buffer.push(&data[..10]);
    assert!(buffer.try_take(20).is_none());
    assert_eq!(buffer.len(), 10);

    buffer.push(&data[10..]);
    assert_eq!(buffer.try_take(10).unwrap(), data[..10].to_vec());
    assert_eq!(buffer.try_take(10).unwrap(), data[10..].to_vec());
    assert!(buffer.is_empty());
}

#[test]
fn test_taken_blocks_are_contiguous_under_overflow() {
    const MODULUS: u32 = 251;
    let buffer = Arc::new(StreamBuffer::new(4096));

    let producer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut counter = 0u32;
            for _ in 0..2000 {
                let chunk: Vec<u8> = (0..97)
                    .map(|_| {
                        let b = (counter % MODULUS) as u8;
                        counter += 1;
                        b
                    })
                    .collect();
                buffer.push(&chunk);
            }
        })
    };

    let mut blocks = 0;
    while !producer.is_finished() || buffer.len() >= 512 {
        if let Some(block) = buffer.try_take(512) {
            for pair in block.windows(2) {
                assert_eq!((pair[0] as u32 + 1) % MODULUS, pair[1] as u32);
            }
            blocks += 1;
        }
    }
    producer.join().unwrap();

    assert!(blocks > 0);
    assert!(buffer.len() <= buffer.capacity());
    assert_eq!(
        blocks * 512 + buffer.len() as u64 + buffer.evicted_bytes(),
        2000 * 97
    );
}
