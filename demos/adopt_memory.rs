//! Handing existing memory to buffers and taking it back.
//!
//! Run with:
//!     cargo run --example adopt_memory

use std::ptr::NonNull;

use bytes::Bytes;
use iobufrs::{IoBuf, ReleaseEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A Vec moves in and out without copying
    let mut vec = Vec::with_capacity(4096);
    vec.extend_from_slice(b"GET /index.html HTTP/1.1\r\n");
    let original = vec.as_ptr();

    let mut request = IoBuf::from_vec(vec);
    request.extend_from_slice(b"Host: example.com\r\n\r\n")?;
    request.add_observer(|event: ReleaseEvent| println!("vec storage: {:?}", event));

    let vec = request.into_vec()?;
    println!("same allocation after round trip: {}", vec.as_ptr() == original);
    print!("{}", String::from_utf8_lossy(&vec));

    // Memory with its own release function
    let memory: Box<[u8]> = vec![b'x'; 64].into_boxed_slice();
    let len = memory.len();
    let ptr = NonNull::new(Box::into_raw(memory).cast::<u8>()).ok_or("null box")?;
    // SAFETY: the box is leaked above and reclaimed only by the release function.
    let adopted = unsafe {
        IoBuf::take_ownership(
            ptr,
            len,
            0,
            len,
            |ptr: NonNull<u8>, size| {
                println!("\nreleasing {} adopted bytes", size);
                let slice = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), size);
                // SAFETY: rebuilds the box leaked in main.
                drop(unsafe { Box::from_raw(slice) });
            },
            true,
        )?
    };
    let view = adopted.clone();
    drop(adopted);
    println!("\nadopted view still readable: {} bytes", view.length());
    drop(view);

    // Bytes are shared, never written in place
    let bytes = Bytes::from_static(b"static payload");
    let mut from_bytes = IoBuf::from(bytes.clone());
    println!("\nfrom Bytes shared: {}", from_bytes.is_shared());
    from_bytes.unshare()?;
    from_bytes.writable_data()[0] = b'S';
    println!(
        "after unshare: {:?} / original {:?}",
        String::from_utf8_lossy(from_bytes.data()),
        String::from_utf8_lossy(&bytes)
    );

    // Gather-write view over a chain
    let mut chain = IoBuf::from(b"header|".to_vec());
    chain.append_to_chain(IoBuf::from(b"body".to_vec()));
    let slices = chain.to_io_slices();
    println!("\n{} io slices, {} bytes", slices.len(), slices.iter().map(|s| s.len()).sum::<usize>());

    Ok(())
}
