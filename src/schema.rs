//! The photon library file schema
//!
//! A library file is one fixed sequence of tagged blocks:
//!
//! ```text
//! PLIB  version (currently 1; 0 is reserved as "undefined")
//! CNFG  free-form configuration text
//! NTRY  total number of table entries
//! NCHN  channels per voxel
//! NVXL  number of voxels
//! for each axis x, y, z:
//!   AXI?  open bookmark          NBO?  step count
//!   MIN?  lower bound [cm]       MAX?  upper bound [cm]
//!   STE?  cell width [cm]        END?  close bookmark
//! PHVS  visibility data: n_entries single-precision floats,
//!       voxel-major, channel-minor
//! DONE  terminating bookmark
//! ```
//!
//! [`LibraryFile`] drives that sequence in both directions: parsing the
//! header of an existing file (recording where the visibility data starts)
//! and emitting a whole new file from a header plus a flat `f32` buffer.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blocks::{BlockInfo, Bookmark, MagicKey, Number, Scalar, StringBlock, Version};
use crate::error::{PhotlibError, Result};
use crate::file::BlockFile;

/// The latest supported file format version.
pub const LATEST_FORMAT_VERSION: u32 = 1;

/// Version number reserved as "undefined"; never valid in a file.
pub const UNDEFINED_FORMAT_VERSION: u32 = 0;

/// Placeholder resolved to [`LATEST_FORMAT_VERSION`] when the header is set.
pub const DEFAULT_FORMAT_VERSION: u32 = u32::MAX;

/// Relative tolerance for the axis upper-bound consistency check; the bound
/// is recomputed from `lower + step * n_steps` in floating point.
const AXIS_TOLERANCE: f64 = 1e-3;

const KEY_LIBRARY: MagicKey = MagicKey::new(*b"PLIB");
const KEY_CONFIGURATION: MagicKey = MagicKey::new(*b"CNFG");
const KEY_ENTRIES: MagicKey = MagicKey::new(*b"NTRY");
const KEY_CHANNELS: MagicKey = MagicKey::new(*b"NCHN");
const KEY_VOXELS: MagicKey = MagicKey::new(*b"NVXL");
const KEY_DATA: MagicKey = MagicKey::new(*b"PHVS");
const KEY_END: MagicKey = MagicKey::new(*b"DONE");

const AXIS_NAMES: [char; 3] = ['x', 'y', 'z'];
const AXIS_LETTERS: &[u8; 3] = b"XYZ";

/// Builds an axis-specific key, e.g. `("NBO", 1)` becomes `NBOY`.
fn axis_key(prefix: &[u8; 3], axis: usize) -> MagicKey {
    MagicKey::new([prefix[0], prefix[1], prefix[2], AXIS_LETTERS[axis]])
}

// -----------------------------------------------------------------------------
/// Segmentation of one spatial axis of the voxel grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisSpecs {
    /// Number of cells the axis is split into.
    pub n_steps: u32,
    /// Lower bound of the covered range (world coordinates) [cm]
    pub lower: f64,
    /// Upper bound of the covered range (world coordinates) [cm]
    pub upper: f64,
    /// Cell width [cm]
    pub step: f64,
}

/// Library metadata as stored in the file header.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryHeader {
    /// Version of the file format.
    pub version: u32,
    /// Configuration used to generate the library.
    pub configuration: String,
    /// Total number of entries in the table.
    pub n_entries: u32,
    /// Number of channels per voxel.
    pub n_channels: u32,
    /// Number of voxels in the grid.
    pub n_voxels: u32,
    /// Segmentation of each of the x, y and z axes.
    pub axes: [AxisSpecs; 3],
}

impl fmt::Display for LibraryHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " (format version {})", self.version)?;
        writeln!(
            f,
            "  {} entries = {} voxels x {} channels",
            self.n_entries, self.n_voxels, self.n_channels
        )?;
        for (axis, name) in self.axes.iter().zip(AXIS_NAMES) {
            writeln!(
                f,
                "  {} axis: [ {} -- {} ] cm in {} steps, {} cm each",
                name, axis.lower, axis.upper, axis.n_steps, axis.step
            )?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
/// Header information plus what the parse derived from it.
#[derive(Clone, Debug)]
struct HeaderInfo {
    header: LibraryHeader,
    /// File offset of the first visibility value.
    data_offset: u64,
}

/// Reads and writes one photon library file.
///
/// The object is associated with a path; the file itself is opened anew by
/// each operation. Parsing the header caches the metadata and the offset of
/// the visibility data for later random access.
pub struct LibraryFile {
    path: PathBuf,
    header: Option<HeaderInfo>,
}

impl LibraryFile {
    /// Associates this object with a file path. Nothing is opened yet.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        LibraryFile {
            path: path.into(),
            header: None,
        }
    }

    /// The path this object reads from and writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether header information is available.
    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    /// The header information, if set or parsed.
    pub fn header(&self) -> Option<&LibraryHeader> {
        self.header.as_ref().map(|info| &info.header)
    }

    /// File offset of the first visibility value, known after a header parse.
    pub fn data_offset(&self) -> Option<u64> {
        self.header.as_ref().map(|info| info.data_offset)
    }

    /// Adopts `header` for subsequent writes, after validation.
    ///
    /// A [`DEFAULT_FORMAT_VERSION`] placeholder is replaced with the latest
    /// version before the invariants are checked.
    pub fn set_header(&mut self, mut header: LibraryHeader) -> Result<()> {
        if header.version == DEFAULT_FORMAT_VERSION {
            header.version = LATEST_FORMAT_VERSION;
        }
        validate_header(&header)?;
        self.header = Some(HeaderInfo {
            header,
            data_offset: 0,
        });
        Ok(())
    }

    // --- reading -------------------------------------------------------------

    /// Parses the header of the file.
    ///
    /// On success the configuration, dimensions and axis extents are cached,
    /// together with the offset of the visibility data. On any failure the
    /// cached header is cleared and the error is returned.
    pub fn read_header(&mut self) -> Result<&LibraryHeader> {
        self.header = None;

        let file = File::open(&self.path).map_err(|source| PhotlibError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut src = BlockFile::new(BufReader::new(file));

        let info = self.parse_header(&mut src)?;
        debug!(
            path = %self.path.display(),
            voxels = info.header.n_voxels,
            channels = info.header.n_channels,
            data_offset = info.data_offset,
            "parsed library header"
        );
        Ok(&self.header.insert(info).header)
    }

    fn parse_header<S: Read + Seek>(&self, src: &mut BlockFile<S>) -> Result<HeaderInfo> {
        let mut header = LibraryHeader::default();

        header.version = src
            .read_block::<Version>(KEY_LIBRARY, "format version")?
            .value();
        if header.version == UNDEFINED_FORMAT_VERSION
            || header.version > LATEST_FORMAT_VERSION
        {
            return Err(PhotlibError::UnsupportedVersion(header.version));
        }

        header.configuration = src
            .read_block::<StringBlock>(KEY_CONFIGURATION, "configuration string")?
            .text()
            .into_owned();

        header.n_entries = src
            .read_block::<Number<u32>>(KEY_ENTRIES, "number of entries in the table")?
            .value();
        header.n_channels = src
            .read_block::<Number<u32>>(KEY_CHANNELS, "number of channels in the table")?
            .value();
        header.n_voxels = src
            .read_block::<Number<u32>>(KEY_VOXELS, "number of voxels in the table")?
            .value();

        for axis in 0..3 {
            let name = AXIS_NAMES[axis];
            let specs = &mut header.axes[axis];

            src.read_block::<Bookmark>(
                axis_key(b"AXI", axis),
                &format!("{name} axis segmentation"),
            )?;
            specs.n_steps = src
                .read_block::<Number<u32>>(
                    axis_key(b"NBO", axis),
                    &format!("{name} axis step count"),
                )?
                .value();
            specs.lower = src
                .read_block::<Number<f64>>(
                    axis_key(b"MIN", axis),
                    &format!("{name} range lower bound"),
                )?
                .value();
            specs.upper = src
                .read_block::<Number<f64>>(
                    axis_key(b"MAX", axis),
                    &format!("{name} range upper bound"),
                )?
                .value();
            specs.step = src
                .read_block::<Number<f64>>(
                    axis_key(b"STE", axis),
                    &format!("{name} range step size"),
                )?
                .value();
            src.read_block::<Bookmark>(axis_key(b"END", axis), &format!("{name} axis data end"))?;
        }

        validate_header(&header)?;

        let data_info = src.read_block_header(KEY_DATA, "visibility data")?;
        let expected = u64::from(header.n_entries) * f32::STORED_SIZE;
        if data_info.size != expected {
            return Err(PhotlibError::SizeMismatch {
                what: format!("visibility data for {} entries", header.n_entries),
                expected,
                actual: data_info.size,
            });
        }
        let data_offset = src.current_offset()?;
        src.skip_payload(&data_info, "visibility data")?;

        src.read_block::<Bookmark>(KEY_END, "end of data marker")?;

        // nothing may follow the end marker
        match src.read_any_block_header("trailing data") {
            Ok(info) => {
                return Err(PhotlibError::Inconsistent {
                    field: "end of file".to_string(),
                    expected: "no blocks after the end marker".to_string(),
                    actual: format!("block '{}' of {} bytes", info.key, info.size),
                })
            }
            Err(e) if e.is_eof() => {}
            Err(e) => return Err(e),
        }

        Ok(HeaderInfo {
            header,
            data_offset,
        })
    }

    // --- writing -------------------------------------------------------------

    /// Writes the header blocks into a fresh file, truncating it.
    pub fn write_header(&self) -> Result<()> {
        let mut dest = self.create_library_file(true)?;
        self.write_header_to(&mut dest)?;
        dest.flush()
    }

    /// Appends the visibility data block to the file.
    pub fn write_data(&self, data: &[f32]) -> Result<()> {
        self.check_data_len(data)?;
        let mut dest = self.create_library_file(false)?;
        self.write_data_to(&mut dest, data)?;
        dest.flush()
    }

    /// Appends the closing marker to the file.
    pub fn write_footer(&self) -> Result<()> {
        if self.header.is_none() {
            return Err(PhotlibError::MissingHeader);
        }
        let mut dest = self.create_library_file(false)?;
        self.write_footer_to(&mut dest)?;
        dest.flush()
    }

    /// Writes the whole file: header, `data` and footer.
    pub fn write_file(&self, data: &[f32]) -> Result<()> {
        self.check_data_len(data)?;
        let mut dest = self.create_library_file(true)?;
        self.write_header_to(&mut dest)?;
        self.write_data_to(&mut dest, data)?;
        self.write_footer_to(&mut dest)?;
        dest.flush()?;
        debug!(
            path = %self.path.display(),
            entries = data.len(),
            "wrote library file"
        );
        Ok(())
    }

    fn write_header_to<S: Write + Seek>(&self, dest: &mut BlockFile<S>) -> Result<()> {
        let header = match &self.header {
            Some(info) => &info.header,
            None => return Err(PhotlibError::MissingHeader),
        };

        dest.write_block(&Version::new(KEY_LIBRARY, header.version))?;
        dest.write_block(&StringBlock::new(KEY_CONFIGURATION, &header.configuration))?;
        dest.write_block(&Number::new(KEY_ENTRIES, header.n_entries))?;
        dest.write_block(&Number::new(KEY_CHANNELS, header.n_channels))?;
        dest.write_block(&Number::new(KEY_VOXELS, header.n_voxels))?;

        for (axis, specs) in header.axes.iter().enumerate() {
            dest.write_block(&Bookmark::new(axis_key(b"AXI", axis)))?;
            dest.write_block(&Number::new(axis_key(b"NBO", axis), specs.n_steps))?;
            dest.write_block(&Number::new(axis_key(b"MIN", axis), specs.lower))?;
            dest.write_block(&Number::new(axis_key(b"MAX", axis), specs.upper))?;
            dest.write_block(&Number::new(axis_key(b"STE", axis), specs.step))?;
            dest.write_block(&Bookmark::new(axis_key(b"END", axis)))?;
        }
        Ok(())
    }

    fn write_data_to<S: Write + Seek>(
        &self,
        dest: &mut BlockFile<S>,
        data: &[f32],
    ) -> Result<()> {
        let info = BlockInfo::new(KEY_DATA, data.len() as u64 * f32::STORED_SIZE);
        dest.write_block_and_payload(&info, data)
    }

    fn write_footer_to<S: Write + Seek>(&self, dest: &mut BlockFile<S>) -> Result<()> {
        dest.write_block(&Bookmark::new(KEY_END))
    }

    fn check_data_len(&self, data: &[f32]) -> Result<()> {
        let header = match &self.header {
            Some(info) => &info.header,
            None => return Err(PhotlibError::MissingHeader),
        };
        if data.len() as u64 != u64::from(header.n_entries) {
            return Err(PhotlibError::Inconsistent {
                field: "visibility data length".to_string(),
                expected: format!("{} entries", header.n_entries),
                actual: format!("{} entries", data.len()),
            });
        }
        Ok(())
    }

    fn create_library_file(&self, truncate: bool) -> Result<BlockFile<BufWriter<File>>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| PhotlibError::Open {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true);
        if truncate {
            options.truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(&self.path).map_err(|source| PhotlibError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(BlockFile::new(BufWriter::new(file)))
    }
}

// -----------------------------------------------------------------------------
/// Checks the cross-field invariants of a library header.
///
/// Any violation is reported with the offending field and the observed
/// against the expected value.
pub fn validate_header(header: &LibraryHeader) -> Result<()> {
    for (axis, name) in header.axes.iter().zip(AXIS_NAMES) {
        let expected_upper = axis.lower + axis.step * f64::from(axis.n_steps);
        let scale = axis.upper.abs().max(expected_upper.abs());
        if (axis.upper - expected_upper).abs() > AXIS_TOLERANCE * scale {
            return Err(PhotlibError::Inconsistent {
                field: format!("{name} axis upper bound"),
                expected: format!(
                    "{} cm ({} + {} x {} cm)",
                    expected_upper, axis.lower, axis.n_steps, axis.step
                ),
                actual: format!("{} cm", axis.upper),
            });
        }
    }

    let n_voxels: u64 = header
        .axes
        .iter()
        .map(|axis| u64::from(axis.n_steps))
        .product();
    if n_voxels != u64::from(header.n_voxels) {
        return Err(PhotlibError::Inconsistent {
            field: "voxel count".to_string(),
            expected: format!("{n_voxels} voxels from the axis segmentation"),
            actual: format!("{} voxels", header.n_voxels),
        });
    }

    let n_entries = u64::from(header.n_voxels) * u64::from(header.n_channels);
    if n_entries != u64::from(header.n_entries) {
        return Err(PhotlibError::Inconsistent {
            field: "entry count".to_string(),
            expected: format!(
                "{} ({} voxels x {} channels)",
                n_entries, header.n_voxels, header.n_channels
            ),
            actual: format!("{}", header.n_entries),
        });
    }

    Ok(())
}
