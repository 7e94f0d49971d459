#![no_main]

use libfuzzer_sys::fuzz_target;
use iobufrs::IoBuf;

fn contents(buf: &IoBuf) -> Vec<u8> {
    buf.segments().flat_map(|seg| seg.data().iter().copied()).collect()
}

fuzz_target!(|data: Vec<u8>| {
    let mut chain = IoBuf::new();
    let mut model: Vec<u8> = Vec::new();
    let mut snapshot: Option<(IoBuf, Vec<u8>)> = None;

    // Each op is an opcode byte followed by one argument byte
    for op in data.chunks(2) {
        let arg = op.get(1).copied().unwrap_or(0) as usize;
        match op[0] % 8 {
            0 => {
                let bytes = vec![arg as u8; arg % 48];
                model.extend_from_slice(&bytes);
                chain.append_to_chain(IoBuf::from(bytes));
            }
            1 => {
                let bytes = vec![arg as u8; arg % 48];
                model.splice(0..0, bytes.iter().copied());
                chain.prepend_chain(IoBuf::copy_from_slice(&bytes).unwrap());
            }
            2 => {
                let n = arg.min(chain.length());
                chain.trim_start(n).unwrap();
                model.drain(..n);
            }
            3 => {
                if let Some(tail) = chain.unlink_tail() {
                    model.truncate(model.len() - tail.length());
                }
            }
            4 => {
                chain.unshare().unwrap();
                chain.coalesce().unwrap();
                assert!(!chain.is_chained());
            }
            5 => {
                chain.unshare().unwrap();
                let total = chain.compute_chain_data_length();
                match chain.gather(arg) {
                    Ok(head) => assert!(head.len() >= arg),
                    Err(_) => assert!(arg > total),
                }
            }
            6 => snapshot = Some((chain.clone(), model.clone())),
            _ => {
                chain.unshare().unwrap();
                assert!(!chain.is_shared() || !chain.is_managed());
            }
        }

        // Verify: the chain always holds exactly the modelled bytes
        assert_eq!(chain.compute_chain_data_length(), model.len());
        assert_eq!(contents(&chain), model);

        // Verify: geometry of every node
        for seg in chain.segments() {
            assert_eq!(seg.headroom() + seg.length() + seg.tailroom(), seg.capacity());
        }

        // Verify: snapshots are never disturbed by later edits
        if let Some((copy, expected)) = &snapshot {
            assert_eq!(contents(copy), *expected);
        }
    }
});
