#![no_main]

use bytes::Buf;
use libfuzzer_sys::fuzz_target;
use iobufrs::{Cursor, IoBuf};

fuzz_target!(|data: Vec<u8>| {
    if data.is_empty() {
        return;
    }

    // First byte picks the segment size, the rest is the payload
    let segment = data[0] as usize % 17 + 1;
    let payload = &data[1..];

    let mut pieces = payload.chunks(segment);
    let mut chain = IoBuf::copy_from_slice(pieces.next().unwrap_or_default()).unwrap();
    for piece in pieces {
        chain.append_to_chain(IoBuf::copy_from_slice(piece).unwrap());
    }

    // Verify: spans concatenate to the payload
    let flat: Vec<u8> = Cursor::new(&chain).into_iter().flatten().copied().collect();
    assert_eq!(flat, payload);

    // Verify: fixed-size pulls match slicing
    let mut cursor = Cursor::new(&chain);
    let mut frame = [0u8; 5];
    let mut offset = 0;
    while cursor.pull(&mut frame).is_ok() {
        assert_eq!(&frame[..], &payload[offset..offset + 5]);
        offset += 5;
    }
    assert_eq!(cursor.remaining(), payload.len() - offset);

    // Verify: the Buf view agrees
    let mut view = Cursor::new(&chain);
    let copied = view.copy_to_bytes(payload.len());
    assert_eq!(&copied[..], payload);
    assert!(!view.has_remaining());

    // Verify: segmentation is invisible to equality and hashing
    let whole = IoBuf::copy_from_slice(payload).unwrap();
    assert_eq!(chain, whole);
    assert_eq!(chain.content_hash(), whole.content_hash());
});
