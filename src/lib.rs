//! # Photlib - Photon Visibility Library Container
//!
//! `photlib` reads and writes a tagged-block binary container holding a
//! voxel-indexed, channel-indexed visibility table together with its
//! metadata, and serves random `(voxel, channel)` lookups against the
//! still-open file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photlib::{AxisSpecs, LibraryHeader, Result, DEFAULT_FORMAT_VERSION};
//!
//! # fn main() -> Result<()> {
//! let axis = AxisSpecs { n_steps: 2, lower: 0.0, upper: 2.0, step: 1.0 };
//! let header = LibraryHeader {
//!     version: DEFAULT_FORMAT_VERSION,
//!     configuration: "services.PhotonVisibility: {}".to_string(),
//!     n_entries: 16,
//!     n_channels: 2,
//!     n_voxels: 8,
//!     axes: [axis, axis, axis],
//! };
//! let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
//!
//! // Write a library, then look values up without loading the table.
//! photlib::write("vis.phlib", header, &data)?;
//! let reader = photlib::open("vis.phlib")?;
//! let one = reader.get(3, 1)?;
//! let all = reader.get_voxel(5)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## File layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Photon Library File                │
//! ├─────────────────────────────────────────────┤
//! │ PLIB: format version (key + 1 word)         │
//! │ CNFG: configuration text                    │
//! │ NTRY, NCHN, NVXL: table dimensions          │
//! ├─────────────────────────────────────────────┤
//! │ AXIX..ENDX, AXIY..ENDY, AXIZ..ENDZ:         │
//! │   per-axis grid segmentation                │
//! ├─────────────────────────────────────────────┤
//! │ PHVS: n_entries f32 values,                 │
//! │   voxel-major, channel-minor  ◄── data      │
//! │                                    offset   │
//! ├─────────────────────────────────────────────┤
//! │ DONE: end marker                            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every block is a 4-byte magic key, an 8-byte payload size and the payload
//! padded with NULs to the next 4-byte word. Numbers are in host byte order;
//! a file is meant to be read on the platform that wrote it.
//!
//! ## Concurrency
//!
//! One [`VoxelReader`] may serve lookups from many threads: metadata is
//! immutable, and the single file handle is guarded by a lock spanning
//! exactly the seek-and-read pair of each query. Independent readers on the
//! same file do not interact at all.

pub mod blocks;
pub mod error;
pub mod file;
pub mod reader;
pub mod schema;

// Re-export commonly used types
pub use blocks::{
    aligned_size, padding_size, Block, BlockInfo, Bookmark, FileBlock, MagicKey, Number, Scalar,
    StringBlock, Version, WORD_SIZE,
};
pub use error::{PhotlibError, Result};
pub use file::BlockFile;
pub use reader::VoxelReader;
pub use schema::{
    validate_header, AxisSpecs, LibraryFile, LibraryHeader, DEFAULT_FORMAT_VERSION,
    LATEST_FORMAT_VERSION, UNDEFINED_FORMAT_VERSION,
};

use std::path::Path;

/// Opens a library file for random access.
pub fn open<P: AsRef<Path>>(path: P) -> Result<VoxelReader> {
    VoxelReader::open(path)
}

/// Writes a complete library file from a header and a flat data buffer.
///
/// The header is validated first; `data` must hold exactly
/// `header.n_entries` values, laid out voxel-major, channel-minor. Missing
/// parent directories are created.
pub fn write<P: AsRef<Path>>(path: P, header: LibraryHeader, data: &[f32]) -> Result<()> {
    let mut library = LibraryFile::new(path.as_ref());
    library.set_header(header)?;
    library.write_file(data)
}
