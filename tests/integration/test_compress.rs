//! Compression through `BgzfWriter`.

use std::fs::File;
use std::io::{BufReader, Read, Write};

use pooled_bgzf::{BGZF_BLOCK_SIZE, BGZF_EOF, BgzfError, MAX_BLOCK_SIZE, PipelineBuilder};
use proptest::prelude::*;
use tempfile::TempDir;

use crate::helpers::{SharedBuffer, gunzip, member_sizes, numbered_lines, pipeline, random_bytes, read_all};

#[test]
fn test_empty_writer_emits_only_eof() {
    let pipeline = pipeline(2);
    let compressed = pipeline.writer(Vec::new()).finish().unwrap();
    assert_eq!(compressed, BGZF_EOF);
}

#[test]
fn test_output_is_valid_gzip() {
    let pipeline = pipeline(4);
    let data = numbered_lines(1_000_000);

    let mut writer = pipeline.writer(Vec::new());
    writer.write_all(&data).unwrap();
    let compressed = writer.finish().unwrap();

    assert_eq!(gunzip(&compressed), data);
    assert!(compressed.ends_with(&BGZF_EOF));
    let sizes = member_sizes(&compressed);
    assert_eq!(sizes.len(), data.len().div_ceil(BGZF_BLOCK_SIZE) + 1);
    assert!(sizes.iter().all(|&size| size <= MAX_BLOCK_SIZE));
}

#[test]
fn test_oversized_chunk_splits_into_two_members() {
    let pipeline = PipelineBuilder::new().threads(2).compression_level(6).build().unwrap();
    let data = vec![b'A'; 70_000];

    let mut writer = pipeline.writer(Vec::new());
    writer.write_chunk(&data).unwrap();
    let compressed = writer.finish().unwrap();

    let sizes = member_sizes(&compressed);
    assert_eq!(sizes.len(), 3, "two data members plus EOF");
    assert_eq!(*sizes.last().unwrap(), BGZF_EOF.len());
    assert_eq!(gunzip(&compressed), data);
    assert_eq!(read_all(&pipeline, compressed).unwrap(), data);
}

#[test]
fn test_incompressible_data_stays_within_member_limit() {
    let pipeline = PipelineBuilder::new().threads(2).compression_level(0).build().unwrap();
    let data = random_bytes(7, 5 * BGZF_BLOCK_SIZE + 123);

    let mut writer = pipeline.writer(Vec::new());
    writer.write_all(&data).unwrap();
    let compressed = writer.finish().unwrap();

    assert!(member_sizes(&compressed).iter().all(|&size| size <= MAX_BLOCK_SIZE));
    assert_eq!(gunzip(&compressed), data);
}

#[test]
fn test_chunk_larger_than_two_members_is_rejected() {
    let pipeline = pipeline(1);
    let mut writer = pipeline.writer(Vec::new());
    let err = writer.write_chunk(&vec![0; 2 * BGZF_BLOCK_SIZE + 1]).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    assert_eq!(writer.finish().unwrap(), BGZF_EOF);
}

#[test]
fn test_write_chunk_preserves_order_with_buffered_bytes() {
    let pipeline = pipeline(4);
    let mut writer = pipeline.writer(Vec::new());
    writer.write_all(b"buffered ").unwrap();
    writer.write_chunk(b"chunk ").unwrap();
    writer.write_all(b"tail").unwrap();
    let compressed = writer.finish().unwrap();

    assert_eq!(gunzip(&compressed), b"buffered chunk tail");
    assert_eq!(member_sizes(&compressed).len(), 4);
}

#[test]
fn test_flush_makes_data_visible() {
    let pipeline = pipeline(4);
    let sink = SharedBuffer::default();
    let data = numbered_lines(300_000);

    let mut writer = pipeline.writer(sink.clone());
    writer.write_all(&data[..200_000]).unwrap();
    writer.flush().unwrap();
    assert_eq!(gunzip(&sink.contents()), &data[..200_000]);

    writer.write_all(&data[200_000..]).unwrap();
    writer.finish().unwrap();
    let compressed = sink.contents();
    assert_eq!(gunzip(&compressed), data);
    assert!(compressed.ends_with(&BGZF_EOF));
}

#[test]
fn test_add_eof_block_is_written_once() {
    let pipeline = pipeline(2);
    let sink = SharedBuffer::default();

    let mut writer = pipeline.writer(sink.clone());
    writer.write_all(b"some data").unwrap();
    writer.add_eof_block().unwrap();
    writer.add_eof_block().unwrap();
    writer.finish().unwrap();

    let compressed = sink.contents();
    let sizes = member_sizes(&compressed);
    assert_eq!(sizes.len(), 2);
    assert!(compressed.ends_with(&BGZF_EOF));
}

#[test]
fn test_writes_after_eof_block_get_a_new_eof() {
    let pipeline = pipeline(2);
    let mut writer = pipeline.writer(Vec::new());
    writer.write_all(b"first").unwrap();
    writer.add_eof_block().unwrap();
    writer.write_all(b"second").unwrap();
    let compressed = writer.finish().unwrap();

    let sizes = member_sizes(&compressed);
    assert_eq!(sizes.len(), 4);
    assert_eq!(sizes[1], BGZF_EOF.len());
    assert!(compressed.ends_with(&BGZF_EOF));
    assert_eq!(gunzip(&compressed), b"firstsecond");
    assert_eq!(read_all(&pipeline, compressed).unwrap(), b"firstsecond");
}

#[test]
fn test_dropped_writer_finishes_itself() {
    let pipeline = pipeline(2);
    let sink = SharedBuffer::default();
    {
        let mut writer = pipeline.writer(sink.clone());
        writer.write_all(b"dropped without finish").unwrap();
    }
    let compressed = sink.contents();
    assert!(compressed.ends_with(&BGZF_EOF));
    assert_eq!(gunzip(&compressed), b"dropped without finish");
}

#[test]
fn test_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.gz");
    let data = numbered_lines(2_000_000);
    let pipeline = pipeline(4);

    let mut writer = pipeline.writer(File::create(&path).unwrap());
    writer.write_all(&data).unwrap();
    writer.finish().unwrap().sync_all().unwrap();

    let mut reader = pipeline.reader(BufReader::new(File::open(&path).unwrap()));
    let mut roundtrip = Vec::new();
    reader.read_to_end(&mut roundtrip).unwrap();
    assert_eq!(roundtrip, data);
}

#[test]
fn test_every_level_round_trips() {
    let data = numbered_lines(3 * BGZF_BLOCK_SIZE);
    for level in 0..=9 {
        let pipeline = PipelineBuilder::new().threads(2).compression_level(level).build().unwrap();
        assert_eq!(pipeline.config().compression_level.get(), level);

        let mut writer = pipeline.writer(Vec::new());
        writer.write_all(&data).unwrap();
        let compressed = writer.finish().unwrap();
        assert_eq!(read_all(&pipeline, compressed).unwrap(), data, "level {level}");
    }
}

#[test]
fn test_invalid_level_is_an_error() {
    let err = PipelineBuilder::new().compression_level(12).build().err().unwrap();
    assert!(matches!(err, BgzfError::InvalidCompressionLevel(12)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..200_000),
        level in 0_u8..=9,
        threads in 1_usize..=4,
        write_size in 1_usize..100_000,
    ) {
        let pipeline = PipelineBuilder::new().threads(threads).compression_level(level).build().unwrap();
        let mut writer = pipeline.writer(Vec::new());
        for piece in data.chunks(write_size) {
            writer.write_all(piece).unwrap();
        }
        let compressed = writer.finish().unwrap();

        prop_assert_eq!(&gunzip(&compressed), &data);
        prop_assert_eq!(&read_all(&pipeline, compressed).unwrap(), &data);
    }
}
