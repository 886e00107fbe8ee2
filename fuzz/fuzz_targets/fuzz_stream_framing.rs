#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use scope_client::stream::{decode_all, Frame, FrameDecoder};

#[derive(Debug)]
struct ChunkedInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for ChunkedInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        let data: Vec<u8> = u.arbitrary()?;
        let split_points: Vec<u8> = u.arbitrary()?;
        Ok(Self { data, split_points })
    }
}

fuzz_target!(|input: ChunkedInput| {
    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    let mut buf = BytesMut::new();
    let mut decoder = FrameDecoder::new();
    'chunks: for window in splits.windows(2) {
        buf.extend_from_slice(&input.data[window[0]..window[1]]);
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(Frame::Document(_))) => {}
                Ok(Some(Frame::End)) | Ok(None) => break,
                Err(_) => break 'chunks,
            }
        }
    }
    let _ = decoder.finish(&mut buf);
    assert!(decoder.is_done());

    let _ = decode_all(&input.data);
});
