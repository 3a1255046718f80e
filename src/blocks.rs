//! Building blocks of the tagged-block container format
//!
//! Every unit in a container file is a *block*: a 4-byte magic key, an 8-byte
//! payload size, the payload itself and NUL padding up to the next 4-byte
//! word boundary. The version block is the one exception: it stores a single
//! word after the key and no size field at all.
//!
//! All numbers are stored in host byte order. Files are only meant to be read
//! back on the platform that wrote them.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{PhotlibError, Result};

/// The alignment quantum of the format, in bytes.
pub const WORD_SIZE: u64 = 4;

/// Returns `size` rounded up to the next word boundary.
pub const fn aligned_size(size: u64) -> u64 {
    let excess = size % WORD_SIZE;
    if excess == 0 {
        size
    } else {
        size - excess + WORD_SIZE
    }
}

/// Bytes of NUL padding that follow a payload of `size` bytes.
pub const fn padding_size(size: u64) -> u64 {
    aligned_size(size) - size
}

/// Returns whether a payload of `size` bytes needs no padding.
pub const fn is_aligned(size: u64) -> bool {
    size % WORD_SIZE == 0
}

/// Consumes the padding that follows a payload of `size` bytes.
fn read_padding<R: Read + ?Sized>(reader: &mut R, size: u64) -> io::Result<()> {
    let mut pad = [0u8; WORD_SIZE as usize];
    let n = padding_size(size) as usize;
    reader.read_exact(&mut pad[..n])
}

/// Emits the padding that follows a payload of `size` bytes.
fn write_padding<W: Write + ?Sized>(writer: &mut W, size: u64) -> io::Result<()> {
    let pad = [0u8; WORD_SIZE as usize];
    let n = padding_size(size) as usize;
    writer.write_all(&pad[..n])
}

// -----------------------------------------------------------------------------
/// Identifier of a block's kind: exactly one word of opaque bytes.
///
/// Keys built from a string shorter than four characters are right-padded
/// with NULs; the padding is not significant when the key is rendered as
/// text. Comparison is always byte-wise. The all-NUL key is the null key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MagicKey([u8; WORD_SIZE as usize]);

impl MagicKey {
    /// The all-NUL key.
    pub const NULL: MagicKey = MagicKey([0; WORD_SIZE as usize]);

    /// Creates a key from exactly one word of bytes.
    pub const fn new(bytes: [u8; WORD_SIZE as usize]) -> Self {
        MagicKey(bytes)
    }

    /// Returns the raw bytes of the key.
    pub const fn bytes(&self) -> [u8; WORD_SIZE as usize] {
        self.0
    }

    /// Whether this is the null key.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Reads one key from the stream.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; WORD_SIZE as usize];
        reader.read_exact(&mut bytes)?;
        Ok(MagicKey(bytes))
    }

    /// Writes the key into the stream.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

impl From<&str> for MagicKey {
    /// Copies up to the first four bytes of `s`, NUL-padding the tail.
    fn from(s: &str) -> Self {
        let mut bytes = [0u8; WORD_SIZE as usize];
        let n = s.len().min(WORD_SIZE as usize);
        bytes[..n].copy_from_slice(&s.as_bytes()[..n]);
        MagicKey(bytes)
    }
}

impl fmt::Display for MagicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self
            .0
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

// -----------------------------------------------------------------------------
/// Header of a block: a magic key followed by the payload size in bytes.
///
/// The size is the unpadded payload length; the block's on-disk footprint is
/// the header plus [`aligned_size`] of the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block type identification.
    pub key: MagicKey,
    /// Size of the payload, in bytes.
    pub size: u64,
}

impl BlockInfo {
    /// Header with a null key and no payload.
    pub const NULL: BlockInfo = BlockInfo {
        key: MagicKey::NULL,
        size: 0,
    };

    pub const fn new(key: MagicKey, size: u64) -> Self {
        BlockInfo { key, size }
    }

    /// On-disk size of a block header, in bytes.
    pub const fn header_size() -> u64 {
        WORD_SIZE + 8
    }

    /// Size of aligned storage for the payload, in bytes.
    pub const fn aligned_size(&self) -> u64 {
        aligned_size(self.size)
    }

    /// Bytes needed to pad the payload to its aligned storage.
    pub const fn padding_size(&self) -> u64 {
        padding_size(self.size)
    }

    /// Number of `T` values the payload holds.
    pub fn len_as<T: Scalar>(&self) -> u64 {
        self.size / T::STORED_SIZE
    }

    /// Reads the key and then the size of the block from the stream.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let key = MagicKey::read_from(reader)?;
        let size = reader.read_u64::<NativeEndian>()?;
        Ok(BlockInfo { key, size })
    }

    /// Writes the key and the size of the block into the stream.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        self.key.write_to(writer)?;
        writer.write_u64::<NativeEndian>(self.size)?;
        Ok(())
    }

    /// Advances the stream past the aligned payload of this block.
    pub fn skip_payload<S: Seek + ?Sized>(&self, stream: &mut S) -> Result<()> {
        stream.seek(SeekFrom::Current(self.aligned_size() as i64))?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
/// A fixed-width value that can live in a block payload.
///
/// Integers narrower than a word are widened on disk to a full word of the
/// same signedness; everything else is stored as-is.
pub trait Scalar: Copy + Default + PartialEq + fmt::Debug {
    /// Bytes the value occupies on disk.
    const STORED_SIZE: u64;

    /// Reads one value, in host byte order.
    fn read_from<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self>;

    /// Writes one value, in host byte order.
    fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()>;
}

macro_rules! impl_scalar {
    ($t:ty, $read:ident, $write:ident) => {
        impl Scalar for $t {
            const STORED_SIZE: u64 = std::mem::size_of::<$t>() as u64;

            fn read_from<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
                reader.$read::<NativeEndian>()
            }

            fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
                writer.$write::<NativeEndian>(*self)
            }
        }
    };
}

impl_scalar!(u32, read_u32, write_u32);
impl_scalar!(i32, read_i32, write_i32);
impl_scalar!(u64, read_u64, write_u64);
impl_scalar!(i64, read_i64, write_i64);
impl_scalar!(f32, read_f32, write_f32);
impl_scalar!(f64, read_f64, write_f64);

macro_rules! impl_widened_scalar {
    ($t:ty, $stored:ty) => {
        impl Scalar for $t {
            const STORED_SIZE: u64 = WORD_SIZE;

            fn read_from<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
                <$stored>::read_from(reader).map(|v| v as $t)
            }

            fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
                (*self as $stored).write_to(writer)
            }
        }
    };
}

impl_widened_scalar!(u8, u32);
impl_widened_scalar!(u16, u32);
impl_widened_scalar!(i8, i32);
impl_widened_scalar!(i16, i32);

// -----------------------------------------------------------------------------
/// A typed unit of the container that knows how to move itself through a
/// stream.
pub trait Block: Sized {
    /// Reads the whole block, including any payload and padding.
    fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self>;

    /// Writes the whole block, including any payload and padding.
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()>;

    /// The magic key of this block.
    fn key(&self) -> MagicKey;
}

// -----------------------------------------------------------------------------
/// The version block: a key and a single word holding the version number.
///
/// Unlike every other block it has no size field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    key: MagicKey,
    version: u32,
}

impl Version {
    pub const fn new(key: MagicKey, version: u32) -> Self {
        Version { key, version }
    }

    /// The stored version number.
    pub const fn value(&self) -> u32 {
        self.version
    }
}

impl Block for Version {
    fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let key = MagicKey::read_from(reader)?;
        let version = reader.read_u32::<NativeEndian>()?;
        Ok(Version { key, version })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.key.write_to(writer)?;
        writer.write_u32::<NativeEndian>(self.version)?;
        Ok(())
    }

    fn key(&self) -> MagicKey {
        self.key
    }
}

// -----------------------------------------------------------------------------
/// A block with no payload, used to set marks inside the file.
///
/// A bookmark written by this library always has size zero. On read, a
/// non-zero size is tolerated and the payload is discarded; it is up to the
/// schema to reject such a block if it must be empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bookmark {
    info: BlockInfo,
}

impl Bookmark {
    pub const fn new(key: MagicKey) -> Self {
        Bookmark {
            info: BlockInfo::new(key, 0),
        }
    }

    /// Payload size found on read; zero for any bookmark built in memory.
    pub const fn size(&self) -> u64 {
        self.info.size
    }
}

impl Block for Bookmark {
    fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let info = BlockInfo::read_from(reader)?;
        info.skip_payload(reader)?;
        Ok(Bookmark { info })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.info.write_to(writer)
    }

    fn key(&self) -> MagicKey {
        self.info.key
    }
}

// -----------------------------------------------------------------------------
/// A block holding a byte string.
///
/// The stored size is the authoritative length; no NUL terminator is written
/// and padding NULs are not part of the string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringBlock {
    key: MagicKey,
    bytes: Vec<u8>,
}

impl StringBlock {
    pub fn new(key: MagicKey, text: &str) -> Self {
        StringBlock {
            key,
            bytes: text.as_bytes().to_vec(),
        }
    }

    /// Length of the string, in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// The raw bytes of the string.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The string content, with invalid UTF-8 replaced.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl Block for StringBlock {
    fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let info = BlockInfo::read_from(reader)?;
        let mut bytes = vec![0u8; info.size as usize];
        reader.read_exact(&mut bytes)?;
        read_padding(reader, info.size)?;
        Ok(StringBlock {
            key: info.key,
            bytes,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        BlockInfo::new(self.key, self.size()).write_to(writer)?;
        writer.write_all(&self.bytes)?;
        write_padding(writer, self.size())?;
        Ok(())
    }

    fn key(&self) -> MagicKey {
        self.key
    }
}

// -----------------------------------------------------------------------------
/// A block holding a single number of type `T`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Number<T: Scalar> {
    key: MagicKey,
    value: T,
}

impl<T: Scalar> Number<T> {
    pub fn new(key: MagicKey, value: T) -> Self {
        Number { key, value }
    }

    /// The stored value.
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T: Scalar> Block for Number<T> {
    fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let info = BlockInfo::read_from(reader)?;
        if info.size != T::STORED_SIZE {
            return Err(PhotlibError::SizeMismatch {
                what: format!("'{}' number block", info.key),
                expected: T::STORED_SIZE,
                actual: info.size,
            });
        }
        let value = T::read_from(reader)?;
        Ok(Number {
            key: info.key,
            value,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        BlockInfo::new(self.key, T::STORED_SIZE).write_to(writer)?;
        self.value.write_to(writer)?;
        Ok(())
    }

    fn key(&self) -> MagicKey {
        self.key
    }
}

// -----------------------------------------------------------------------------
/// A generic block: a header and an owned, opaque payload.
///
/// The payload is kept as raw bytes; typed access decodes values out of the
/// buffer instead of reinterpreting it in place.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FileBlock {
    info: BlockInfo,
    payload: Vec<u8>,
}

impl FileBlock {
    /// Builds a block owning a copy of `payload`.
    pub fn from_bytes(key: MagicKey, payload: Vec<u8>) -> Self {
        FileBlock {
            info: BlockInfo::new(key, payload.len() as u64),
            payload,
        }
    }

    /// Builds a block whose payload encodes the given values.
    pub fn from_values<T: Scalar>(key: MagicKey, values: &[T]) -> Self {
        let mut payload = Vec::with_capacity(values.len() * T::STORED_SIZE as usize);
        for value in values {
            // writing into a Vec cannot fail
            let _ = value.write_to(&mut payload);
        }
        FileBlock::from_bytes(key, payload)
    }

    pub const fn info(&self) -> &BlockInfo {
        &self.info
    }

    /// Size of the payload, in bytes.
    pub const fn size(&self) -> u64 {
        self.info.size
    }

    pub const fn aligned_size(&self) -> u64 {
        self.info.aligned_size()
    }

    pub const fn padding_size(&self) -> u64 {
        self.info.padding_size()
    }

    /// Number of `T` values the payload holds.
    pub fn len_as<T: Scalar>(&self) -> usize {
        self.info.len_as::<T>() as usize
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the payload as a sequence of `T`.
    ///
    /// Trailing bytes that do not fill a whole value are ignored, matching
    /// [`len_as`](Self::len_as).
    pub fn values<T: Scalar>(&self) -> Vec<T> {
        self.payload
            .chunks_exact(T::STORED_SIZE as usize)
            .map(|mut chunk| match T::read_from(&mut chunk) {
                Ok(value) => value,
                // a full chunk always decodes
                Err(_) => unreachable!("decoding from an exact chunk cannot fail"),
            })
            .collect()
    }

    /// Reads the payload and padding for an already-parsed header.
    pub fn read_payload_from<R: Read + Seek>(info: BlockInfo, reader: &mut R) -> Result<Self> {
        let mut payload = vec![0u8; info.size as usize];
        reader.read_exact(&mut payload)?;
        read_padding(reader, info.size)?;
        Ok(FileBlock { info, payload })
    }
}

impl Block for FileBlock {
    fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let info = BlockInfo::read_from(reader)?;
        FileBlock::read_payload_from(info, reader)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.info.write_to(writer)?;
        writer.write_all(&self.payload)?;
        write_padding(writer, self.size())?;
        Ok(())
    }

    fn key(&self) -> MagicKey {
        self.info.key
    }
}

// -----------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 4);
        assert_eq!(aligned_size(4), 4);
        assert_eq!(aligned_size(5), 8);
        assert_eq!(aligned_size(8), 8);
        assert_eq!(padding_size(5), 3);
        assert_eq!(padding_size(8), 0);
        assert!(is_aligned(12));
        assert!(!is_aligned(13));
    }

    #[test]
    fn test_key_from_short_string() {
        let key = MagicKey::from("AB");
        assert_eq!(key.bytes(), *b"AB\0\0");
        assert_eq!(key.to_string(), "AB");
        assert_eq!(key, MagicKey::new(*b"AB\0\0"));
    }

    #[test]
    fn test_key_display_trims_trailing_nuls_only() {
        let key = MagicKey::new(*b"A\0B\0");
        assert_eq!(key.to_string(), "A\0B");
    }

    #[test]
    fn test_null_key() {
        assert!(MagicKey::NULL.is_null());
        assert_eq!(MagicKey::NULL.to_string(), "");
        assert!(!MagicKey::from("DONE").is_null());
    }

    #[test]
    fn test_block_info_round_trip() {
        let info = BlockInfo::new(MagicKey::from("NTRY"), 42);
        let mut buffer = Vec::new();
        info.write_to(&mut buffer).unwrap();
        assert_eq!(buffer.len() as u64, BlockInfo::header_size());

        let read = BlockInfo::read_from(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(read, info);
    }

    #[test]
    fn test_block_info_read_eof() {
        let mut short = Cursor::new(vec![0u8; 7]);
        assert!(BlockInfo::read_from(&mut short).is_err());
    }

    #[test]
    fn test_version_round_trip() {
        let version = Version::new(MagicKey::from("PLIB"), 1);
        let mut buffer = Vec::new();
        version.write_to(&mut buffer).unwrap();
        // key + one word, no size field
        assert_eq!(buffer.len(), 8);

        let read = Version::read_from(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(read, version);
        assert_eq!(read.value(), 1);
    }

    #[test]
    fn test_string_block_padding() {
        let block = StringBlock::new(MagicKey::from("CNFG"), "hello");
        let mut buffer = Vec::new();
        block.write_to(&mut buffer).unwrap();
        // 12-byte header + 5 bytes + 3 NULs of padding
        assert_eq!(buffer.len(), 20);
        assert_eq!(&buffer[12..17], b"hello");
        assert_eq!(&buffer[17..], b"\0\0\0");

        let read = StringBlock::read_from(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(read.size(), 5);
        assert_eq!(read.text(), "hello");
    }

    #[test]
    fn test_number_round_trip() {
        let number = Number::new(MagicKey::from("NUM2"), -2i64);
        let mut buffer = Vec::new();
        number.write_to(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 20);

        let read = Number::<i64>::read_from(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(read.value(), -2);
    }

    #[test]
    fn test_narrow_integer_widens_to_word() {
        let number = Number::new(MagicKey::from("NUM1"), 7u16);
        let mut buffer = Vec::new();
        number.write_to(&mut buffer).unwrap();
        // stored as a full word
        assert_eq!(buffer.len(), 16);

        let read = Number::<u16>::read_from(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(read.value(), 7);
    }

    #[test]
    fn test_number_size_mismatch() {
        let number = Number::new(MagicKey::from("NUM1"), 7u32);
        let mut buffer = Vec::new();
        number.write_to(&mut buffer).unwrap();

        let result = Number::<f64>::read_from(&mut Cursor::new(buffer));
        assert!(matches!(
            result,
            Err(PhotlibError::SizeMismatch {
                expected: 8,
                actual: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_bookmark_is_empty() {
        let mark = Bookmark::new(MagicKey::from("DONE"));
        let mut buffer = Vec::new();
        mark.write_to(&mut buffer).unwrap();
        assert_eq!(buffer.len() as u64, BlockInfo::header_size());

        let read = Bookmark::read_from(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(read.size(), 0);
        assert_eq!(read.key(), MagicKey::from("DONE"));
    }

    #[test]
    fn test_file_block_values() {
        let data = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let block = FileBlock::from_values(MagicKey::from("DATA"), &data);
        assert_eq!(block.size(), 48);
        assert_eq!(block.len_as::<f64>(), 6);

        let mut buffer = Vec::new();
        block.write_to(&mut buffer).unwrap();
        let read = FileBlock::read_from(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(read.values::<f64>(), data.to_vec());
        assert_eq!(read.payload(), block.payload());
    }

    #[test]
    fn test_file_block_unaligned_payload() {
        let block = FileBlock::from_bytes(MagicKey::from("BLOB"), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(block.size(), 7);
        assert_eq!(block.aligned_size(), 8);
        assert_eq!(block.padding_size(), 1);

        let mut buffer = Vec::new();
        block.write_to(&mut buffer).unwrap();
        assert_eq!(buffer.len() as u64, BlockInfo::header_size() + 8);

        let read = FileBlock::read_from(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(read.payload(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(Version::read_from(&mut empty).is_err());
        assert!(StringBlock::read_from(&mut empty).is_err());
        assert!(FileBlock::read_from(&mut empty).is_err());
    }
}
