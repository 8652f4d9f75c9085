//! Decompression through `BgzfReader`.

use std::io::{BufRead, Cursor, Read};

use pooled_bgzf::{BGZF_BLOCK_SIZE, BGZF_EOF, PipelineBuilder};

use crate::helpers::{SharedBuffer, bgzf_crate_compress, numbered_lines, pipeline, read_all};

#[test]
fn test_reads_third_party_output() {
    let pipeline = pipeline(4);
    let data = numbered_lines(1_500_000);
    for level in [1, 6, 9] {
        let compressed = bgzf_crate_compress(&data, BGZF_BLOCK_SIZE, level, true);
        assert_eq!(read_all(&pipeline, compressed).unwrap(), data, "level {level}");
    }
}

#[test]
fn test_eof_only_stream_is_empty() {
    let pipeline = pipeline(2);
    assert!(read_all(&pipeline, BGZF_EOF.to_vec()).unwrap().is_empty());

    let mut reader = pipeline.reader(Cursor::new(BGZF_EOF.to_vec()));
    let block = reader.read_block().unwrap().expect("the EOF member is delivered");
    assert!(block.is_empty());
    assert!(block.is_final());
    assert_eq!(block.block_id(), 0);
    drop(block);
    assert!(reader.read_block().unwrap().is_none());
    assert!(reader.read_block().unwrap().is_none());
}

#[test]
fn test_empty_source_is_empty() {
    let pipeline = pipeline(2);
    let mut reader = pipeline.reader(Cursor::new(Vec::new()));
    assert!(reader.read_block().unwrap().is_none());

    let mut buf = [0_u8; 16];
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_missing_eof_member_reads_all_data() {
    let pipeline = pipeline(2);
    let data = numbered_lines(200_000);
    let compressed = bgzf_crate_compress(&data, BGZF_BLOCK_SIZE, 6, false);
    assert_eq!(read_all(&pipeline, compressed).unwrap(), data);
}

#[test]
fn test_concatenated_streams() {
    let pipeline = pipeline(4);
    let first = numbered_lines(100_000);
    let second = b"second file".to_vec();

    let mut compressed = bgzf_crate_compress(&first, BGZF_BLOCK_SIZE, 6, true);
    compressed.extend(bgzf_crate_compress(&second, BGZF_BLOCK_SIZE, 6, true));

    let mut expected = first;
    expected.extend(second);
    assert_eq!(read_all(&pipeline, compressed).unwrap(), expected);
}

#[test]
fn test_blocks_arrive_with_consecutive_ids() {
    let pipeline = PipelineBuilder::new().threads(8).blocks_per_stream(4).batch_size(3).build().unwrap();
    let data = numbered_lines(400 * 1024);
    let compressed = bgzf_crate_compress(&data, 1024, 6, true);

    let mut reader = pipeline.reader(Cursor::new(compressed));
    let stream_id = reader.stream_id();
    let mut expected_id = 0;
    let mut roundtrip = Vec::new();
    while let Some(block) = reader.read_block().unwrap() {
        assert_eq!(block.stream_id(), stream_id);
        assert_eq!(block.block_id(), expected_id);
        assert_eq!(block.is_final(), expected_id == 400);
        roundtrip.extend_from_slice(block.data());
        expected_id += 1;
    }
    assert_eq!(expected_id, 401);
    assert_eq!(roundtrip, data);
}

#[test]
fn test_holding_blocks_below_pool_size() {
    let pipeline = PipelineBuilder::new().threads(4).blocks_per_stream(4).build().unwrap();
    let data = numbered_lines(64 * 1000);
    let compressed = bgzf_crate_compress(&data, 1000, 6, true);

    let mut reader = pipeline.reader(Cursor::new(compressed));
    let mut held = std::collections::VecDeque::new();
    let mut roundtrip = Vec::new();
    while let Some(block) = reader.read_block().unwrap() {
        held.push_back(block);
        if held.len() == 3 {
            roundtrip.extend_from_slice(held.pop_front().unwrap().data());
        }
    }
    for block in held {
        roundtrip.extend_from_slice(block.data());
    }
    assert_eq!(roundtrip, data);
}

#[test]
fn test_copy_through_mirrors_output() {
    let pipeline = pipeline(4);
    let data = numbered_lines(500_000);
    let compressed = bgzf_crate_compress(&data, BGZF_BLOCK_SIZE, 6, true);
    let copy = SharedBuffer::default();

    let mut reader = pipeline.reader_with_copy_through(Cursor::new(compressed), copy.clone());
    let mut roundtrip = Vec::new();
    reader.read_to_end(&mut roundtrip).unwrap();
    drop(reader);

    assert_eq!(roundtrip, data);
    assert_eq!(copy.contents(), data);
}

#[test]
fn test_buf_read_lines() {
    let pipeline = pipeline(4);
    let data = numbered_lines(300_000);
    let compressed = bgzf_crate_compress(&data, 10_000, 6, true);

    let reader = pipeline.reader(Cursor::new(compressed));
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>().unwrap();
    let expected: Vec<String> = String::from_utf8(data).unwrap().lines().map(String::from).collect();
    assert_eq!(lines, expected);
}

#[test]
fn test_dropping_reader_early_releases_the_stream() {
    let pipeline = PipelineBuilder::new().threads(2).blocks_per_stream(2).build().unwrap();
    let data = numbered_lines(100 * 1000);
    let compressed = bgzf_crate_compress(&data, 1000, 6, true);

    let mut reader = pipeline.reader(Cursor::new(compressed.clone()));
    let first = reader.read_block().unwrap().unwrap();
    assert_eq!(first.data(), &data[..1000]);
    drop(first);
    drop(reader);

    // The pipeline is still usable and shuts down cleanly.
    assert_eq!(read_all(&pipeline, compressed).unwrap(), data);
    pipeline.shutdown().unwrap();
}
