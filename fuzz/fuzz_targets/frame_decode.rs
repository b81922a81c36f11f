//! Fuzz frame decoding with arbitrary bytes and capacities.
//!
//! Decoding must never panic, never return a frame larger than the capacity,
//! and consume exactly the bytes it re-encodes to.

#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use tellerframe_proto::{Frame, ProtocolError};

fuzz_target!(|data: &[u8]| {
    let Some((&capacity, wire)) = data.split_first() else {
        return;
    };
    let capacity = capacity as usize;
    let mut src = wire;

    loop {
        let before = src.remaining();
        match Frame::decode(&mut src, capacity) {
            Ok(Some(frame)) => {
                assert!(frame.payload().len() <= capacity);
                let consumed = before - src.remaining();
                assert_eq!(consumed, frame.encoded_len());

                let mut encoded = BytesMut::new();
                frame.encode(&mut encoded);
                let start = wire.len() - before;
                assert_eq!(&encoded[..], &wire[start..start + consumed]);
            },
            Ok(None) => {
                assert_eq!(src.remaining(), before, "incomplete frame consumed input");
                break;
            },
            Err(ProtocolError::LengthExceedsCapacity { declared, .. }) => {
                assert!(declared > capacity);
                break;
            },
            Err(other) => panic!("unexpected decode error: {other}"),
        }
    }
});
