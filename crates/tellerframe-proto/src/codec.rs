//! Async framing over a byte stream.
//!
//! The serial link delivers bytes one at a time with no notion of message
//! boundaries. [`Framer`] owns both halves of the link and turns it into a
//! stream of [`Frame`] payloads. Every receive waits (without timeout) for the
//! length byte and then for exactly that many payload bytes.
//!
//! Received bytes are buffered and cut into frames by [`Frame::decode`], so
//! the async path and the sync codec share one set of rules. Dropping a
//! pending [`Framer::receive`] loses nothing: a half-read frame stays in the
//! buffer for the next call.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    MAX_PAYLOAD,
    errors::{FrameError, ProtocolError},
    frame::Frame,
};

/// Length-prefixed framing over a read half and a write half.
#[derive(Debug)]
pub struct Framer<R, W> {
    reader: R,
    writer: W,
    /// Bytes read off the link but not yet returned as a frame.
    inbound: BytesMut,
    /// Remaining bytes of a rejected oversized frame still to be skipped.
    discard: usize,
    /// Scratch buffer reused by `send` to issue one write per frame.
    outbound: BytesMut,
}

impl<R, W> Framer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap the two halves of a link.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            inbound: BytesMut::with_capacity(1 + MAX_PAYLOAD),
            discard: 0,
            outbound: BytesMut::with_capacity(1 + MAX_PAYLOAD),
        }
    }

    /// Send `payload` as one frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = Frame::new(Bytes::copy_from_slice(payload))?;

        self.outbound.clear();
        frame.encode(&mut self.outbound);
        self.writer.write_all(&self.outbound).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive one frame whose payload must fit in `capacity` bytes.
    ///
    /// An oversized frame is rejected with `LengthExceedsCapacity` as soon as
    /// its length byte arrives. Its payload is skipped by the following
    /// calls, so the next frame returned starts at a frame boundary.
    ///
    /// Cancel safe.
    pub async fn receive(&mut self, capacity: usize) -> Result<Bytes, FrameError> {
        loop {
            if self.discard > 0 {
                let skipped = self.discard.min(self.inbound.len());
                self.inbound.advance(skipped);
                self.discard -= skipped;
            }

            if self.discard == 0 {
                match Frame::decode(&mut self.inbound, capacity) {
                    Ok(Some(frame)) => return Ok(frame.into_payload()),
                    Ok(None) => {},
                    Err(err) => {
                        if let ProtocolError::LengthExceedsCapacity { declared, .. } = err {
                            self.discard = 1 + declared;
                        }
                        return Err(err.into());
                    },
                }
            }

            if self.reader.read_buf(&mut self.inbound).await? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tokio::io::{AsyncWriteExt, duplex, split};

    use super::*;
    use crate::DEFAULT_CAPACITY;

    #[tokio::test]
    async fn send_then_receive_over_duplex() {
        let (left, right) = duplex(512);
        let (lr, lw) = split(left);
        let (rr, rw) = split(right);
        let mut a = Framer::new(lr, lw);
        let mut b = Framer::new(rr, rw);

        a.send(b"HSM_N").await.unwrap();
        a.send(b"").await.unwrap();

        assert_eq!(b.receive(DEFAULT_CAPACITY).await.unwrap().as_ref(), b"HSM_N");
        assert!(b.receive(DEFAULT_CAPACITY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_is_drained() {
        let (left, right) = duplex(1024);
        let (_lr, mut lw) = split(left);
        let (rr, rw) = split(right);
        let mut b = Framer::new(rr, rw);

        let mut raw = vec![200u8];
        raw.extend(std::iter::repeat_n(0xAA, 200));
        raw.extend_from_slice(b"\x02GO");
        lw.write_all(&raw).await.unwrap();

        let err = b.receive(DEFAULT_CAPACITY).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::Protocol(ProtocolError::LengthExceedsCapacity {
                declared: 200,
                capacity: 128
            })
        ));
        assert!(!err.is_fatal());

        // Link is still aligned on the next frame
        assert_eq!(b.receive(DEFAULT_CAPACITY).await.unwrap().as_ref(), b"GO");
    }

    #[tokio::test]
    async fn closed_link_is_fatal() {
        let (left, right) = duplex(64);
        drop(left);
        let (rr, rw) = split(right);
        let mut b = Framer::new(rr, rw);

        let err = b.receive(DEFAULT_CAPACITY).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn send_rejects_oversized_payload() {
        let (left, _right) = duplex(64);
        let (lr, lw) = split(left);
        let mut a = Framer::new(lr, lw);

        let err = a.send(&[0u8; 300]).await.unwrap_err();
        assert!(matches!(err, FrameError::Protocol(ProtocolError::MessageTooLong { .. })));
    }

    #[tokio::test]
    async fn dropped_receive_keeps_partial_frame() {
        let (left, right) = duplex(64);
        let (_lr, mut lw) = split(left);
        let (rr, rw) = split(right);
        let mut b = Framer::new(rr, rw);

        lw.write_all(b"\x05CAR").await.unwrap();
        let pending = tokio::select! {
            biased;
            frame = b.receive(DEFAULT_CAPACITY) => Some(frame),
            () = std::future::ready(()) => None,
        };
        assert!(pending.is_none());

        lw.write_all(b"D_N").await.unwrap();
        assert_eq!(b.receive(DEFAULT_CAPACITY).await.unwrap().as_ref(), b"CARD_N");
    }

    #[tokio::test]
    async fn oversized_frame_skipped_across_partial_reads() {
        let (left, right) = duplex(16);
        let (_lr, mut lw) = split(left);
        let (rr, rw) = split(right);
        let mut b = Framer::new(rr, rw);

        let writer = async move {
            let mut raw = vec![40u8];
            raw.extend(std::iter::repeat_n(b'x', 40));
            raw.extend_from_slice(b"\x01K");
            lw.write_all(&raw).await.unwrap();
        };
        let reader = async {
            let err = b.receive(8).await.unwrap_err();
            assert!(matches!(
                err,
                FrameError::Protocol(ProtocolError::LengthExceedsCapacity {
                    declared: 40,
                    capacity: 8
                })
            ));
            b.receive(8).await.unwrap()
        };

        let ((), next) = tokio::join!(writer, reader);
        assert_eq!(next.as_ref(), b"K");
    }

    proptest! {
        /// Whatever the capacity, payloads that fit arrive intact, oversized
        /// ones are rejected, and the stream stays aligned on what follows.
        #[test]
        fn prop_framer_round_trip_and_capacity(
            payloads in prop::collection::vec(
                prop::collection::vec(any::<u8>(), 0..=255),
                1..8,
            ),
            capacity in 0usize..=255,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (left, right) = duplex(64);
                let (lr, lw) = split(left);
                let (rr, rw) = split(right);
                let mut a = Framer::new(lr, lw);
                let mut b = Framer::new(rr, rw);

                let sender = async {
                    for payload in &payloads {
                        a.send(payload).await.unwrap();
                    }
                    a.send(b"K").await.unwrap();
                };
                let receiver = async {
                    let mut results = Vec::with_capacity(payloads.len());
                    for _ in &payloads {
                        results.push(b.receive(capacity).await);
                    }
                    let trailer = b.receive(MAX_PAYLOAD).await.unwrap();
                    (results, trailer)
                };
                let ((), (results, trailer)) = tokio::join!(sender, receiver);

                for (payload, result) in payloads.iter().zip(results) {
                    if payload.len() <= capacity {
                        let received = result.unwrap();
                        prop_assert_eq!(received.as_ref(), payload.as_slice());
                    } else {
                        let is_rejected = matches!(
                            result,
                            Err(FrameError::Protocol(ProtocolError::LengthExceedsCapacity {
                                declared,
                                capacity: c,
                            })) if declared == payload.len() && c == capacity
                        );
                        prop_assert!(is_rejected);
                    }
                }
                prop_assert_eq!(trailer.as_ref(), b"K");
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
