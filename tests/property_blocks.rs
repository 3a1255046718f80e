//! Property-based tests for block framing
//!
//! Uses proptest to verify alignment arithmetic and block round-trips hold
//! across many random inputs.

use std::io::Cursor;

use photlib::{
    aligned_size, padding_size, Block, BlockFile, BlockInfo, FileBlock, MagicKey, Number,
    StringBlock, WORD_SIZE,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_aligned_size_is_word_multiple(size in 0u64..1_000_000) {
        let aligned = aligned_size(size);
        prop_assert_eq!(aligned % WORD_SIZE, 0);
        prop_assert!(aligned >= size);
        prop_assert!(aligned < size + WORD_SIZE);
        prop_assert_eq!(aligned - size, padding_size(size));
    }

    #[test]
    fn prop_string_round_trip(text in "[ -~]{0,64}") {
        let block = StringBlock::new(MagicKey::from("STR1"), &text);
        let mut buffer = Vec::new();
        block.write_to(&mut buffer).unwrap();
        prop_assert_eq!(buffer.len() as u64, 12 + aligned_size(text.len() as u64));

        let read = StringBlock::read_from(&mut Cursor::new(buffer)).unwrap();
        prop_assert_eq!(read.text(), text);
    }

    #[test]
    fn prop_number_round_trip(value in any::<i64>()) {
        let block = Number::new(MagicKey::from("NUM2"), value);
        let mut buffer = Vec::new();
        block.write_to(&mut buffer).unwrap();

        let read = Number::<i64>::read_from(&mut Cursor::new(buffer)).unwrap();
        prop_assert_eq!(read.value(), value);
    }

    #[test]
    fn prop_blob_round_trip(payload in prop::collection::vec(any::<u8>(), 0..256)) {
        let block = FileBlock::from_bytes(MagicKey::from("DATA"), payload.clone());
        let mut buffer = Vec::new();
        block.write_to(&mut buffer).unwrap();

        let read = FileBlock::read_from(&mut Cursor::new(buffer)).unwrap();
        prop_assert_eq!(read.payload(), payload.as_slice());
    }

    #[test]
    fn prop_cursor_advances_by_aligned_size(payload in prop::collection::vec(any::<u8>(), 0..256)) {
        let size = payload.len() as u64;
        let mut file = BlockFile::new(Cursor::new(Vec::new()));
        file.write_block(&FileBlock::from_bytes(MagicKey::from("DATA"), payload)).unwrap();
        prop_assert_eq!(
            file.current_offset().unwrap(),
            BlockInfo::header_size() + aligned_size(size)
        );

        let mut cursor = file.into_inner();
        cursor.set_position(0);
        let mut file = BlockFile::new(cursor);
        file.skip_any_block("blob").unwrap();
        prop_assert_eq!(
            file.current_offset().unwrap(),
            BlockInfo::header_size() + aligned_size(size)
        );
    }
}
