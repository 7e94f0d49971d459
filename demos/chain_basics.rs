//! Building, sharing and flattening a buffer chain.
//!
//! Run with:
//!     cargo run --example chain_basics

use iobufrs::{Cursor, IoBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reserve headroom so a header can be written in front later
    let mut frame = IoBuf::create(256)?;
    frame.advance(16)?;
    frame.extend_from_slice(b"hello, ")?;

    // Chain more segments without copying them
    frame.append_to_chain(IoBuf::from(b"chained ".to_vec()));
    frame.append_to_chain(IoBuf::from("world".to_string()));

    // Fill the reserved headroom with a length prefix
    let total = frame.compute_chain_data_length() as u32;
    frame.prepend(4)?;
    frame.writable_data()[..4].copy_from_slice(&total.to_be_bytes());

    println!(
        "{} segments, {} bytes, {} bytes of headroom left",
        frame.count_chain_elements(),
        frame.compute_chain_data_length(),
        frame.headroom()
    );
    for (i, seg) in frame.segments().enumerate() {
        println!(
            "  segment {}: len={}, capacity={}, storage={:?}",
            i,
            seg.length(),
            seg.capacity(),
            seg.storage_kind()
        );
    }

    // Cloning shares the storage
    let shared = frame.clone();
    println!("\nshared after clone: {}", frame.is_shared());

    // Read across segment boundaries without flattening
    let mut cursor = Cursor::new(&shared);
    let mut prefix = [0u8; 4];
    cursor.pull(&mut prefix)?;
    println!("length prefix: {}", u32::from_be_bytes(prefix));
    for span in cursor {
        println!("  span {:?}", String::from_utf8_lossy(span));
    }

    // Flattening copies into one fresh region; the clone is untouched
    let flat = frame.coalesce()?.to_vec();
    println!("\ncoalesced: {:?}", String::from_utf8_lossy(&flat[4..]));
    println!("clone still has {} segments", shared.count_chain_elements());
    println!("contents equal: {}", frame == shared);

    #[cfg(feature = "hash-blake3")]
    println!("content hash: {}", &frame.content_hash().to_hex()[..16]);

    Ok(())
}
