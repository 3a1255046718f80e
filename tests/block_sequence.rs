//! End-to-end tests of the generic block file manager
//!
//! Writes a mixed sequence of typed blocks to a real file and reads it back
//! with and without key expectations.

use photlib::{
    aligned_size, Block, BlockFile, BlockInfo, Bookmark, FileBlock, MagicKey, Number,
    PhotlibError, StringBlock, Version,
};
use tempfile::TempDir;

fn test_data() -> Vec<f64> {
    (1..=6).map(f64::from).collect()
}

fn write_sequence(path: &std::path::Path) {
    let data = test_data();

    let mut dest = BlockFile::create(path).unwrap();
    dest.write_block(&Version::new(MagicKey::from("TEST"), 2))
        .unwrap();
    dest.write_block(&StringBlock::new(MagicKey::from("STR1"), "String data 1"))
        .unwrap();
    dest.write_block(&Number::new(MagicKey::from("NUM1"), 1u32))
        .unwrap();
    dest.write_block(&Number::new(MagicKey::from("NUM2"), -2i64))
        .unwrap();
    dest.write_block(&Bookmark::new(MagicKey::from("MRK1")))
        .unwrap();
    dest.write_block_and_payload(
        &BlockInfo::new(MagicKey::from("DATA"), data.len() as u64 * 8),
        &data,
    )
    .unwrap();
    dest.write_block(&StringBlock::new(MagicKey::from("STR2"), "String data 2"))
        .unwrap();
    dest.write_block(&Bookmark::new(MagicKey::from("DONE")))
        .unwrap();
    dest.flush().unwrap();
}

#[test]
fn test_write_then_read_sequence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.dat");
    write_sequence(&path);

    let mut src = BlockFile::open(&path).unwrap();

    let version: Version = src
        .read_block(MagicKey::from("TEST"), "version block")
        .unwrap();
    assert_eq!(version.value(), 2);

    let string1: StringBlock = src
        .read_block(MagicKey::from("STR1"), "first string")
        .unwrap();
    assert_eq!(string1.text(), "String data 1");

    let number1: Number<u32> = src
        .read_block(MagicKey::from("NUM1"), "first number")
        .unwrap();
    assert_eq!(number1.value(), 1);

    let number2: Number<i64> = src
        .read_block(MagicKey::from("NUM2"), "second number")
        .unwrap();
    assert_eq!(number2.value(), -2);

    src.skip_block(MagicKey::from("MRK1"), "bookmark 1").unwrap();

    let data: FileBlock = src.read_block(MagicKey::from("DATA"), "data").unwrap();
    assert_eq!(data.size(), 48);
    assert_eq!(data.len_as::<f64>(), 6);
    assert_eq!(data.values::<f64>(), test_data());

    let string2: StringBlock = src
        .read_block(MagicKey::from("STR2"), "second string")
        .unwrap();
    assert_eq!(string2.text(), "String data 2");

    src.skip_block(MagicKey::from("DONE"), "end").unwrap();

    // nothing left in the file
    let past_end = src.skip_any_block("past the end");
    assert!(past_end.unwrap_err().is_eof());
}

#[test]
fn test_peek_keys_without_expectations() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.dat");
    write_sequence(&path);

    let mut src = BlockFile::open(&path).unwrap();
    let expected_keys = [
        "TEST", "STR1", "NUM1", "NUM2", "MRK1", "DATA", "STR2", "DONE",
    ];

    let version: Version = src.read_any_block("version block").unwrap();
    assert_eq!(version.key(), MagicKey::from(expected_keys[0]));

    for key in &expected_keys[1..] {
        let info = src.skip_any_block("next block").unwrap();
        assert_eq!(info.key, MagicKey::from(*key));
    }
}

#[test]
fn test_file_size_accounts_for_padding() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.dat");
    write_sequence(&path);

    // version: 8; strings: 12 + pad("String data 1".len());
    // numbers: 12 + 4 and 12 + 8; bookmarks: 12; data: 12 + 48
    let expected: u64 = 8
        + (12 + aligned_size(13))
        + (12 + 4)
        + (12 + 8)
        + 12
        + (12 + 48)
        + (12 + aligned_size(13))
        + 12;
    assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
}

#[test]
fn test_mismatch_consumes_the_block() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.dat");
    write_sequence(&path);

    let mut src = BlockFile::open(&path).unwrap();
    let result = src.read_block::<Version>(MagicKey::from("PLIB"), "format version");
    assert!(matches!(result, Err(PhotlibError::KeyMismatch { .. })));

    // the version block is gone; the stream continues at the first string
    let string1: StringBlock = src
        .read_block(MagicKey::from("STR1"), "first string")
        .unwrap();
    assert_eq!(string1.text(), "String data 1");
}
