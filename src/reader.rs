//! Random access into the visibility data of a library file
//!
//! [`VoxelReader`] parses the header once, then serves `(voxel, channel)`
//! lookups by seeking into the still-open file. No caching is performed:
//! libraries hold hundreds of millions of entries and typical access
//! patterns are sparse, so every query costs one seek and one read.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use byteorder::{NativeEndian, ReadBytesExt};
use parking_lot::Mutex;
use tracing::debug;

use crate::blocks::Scalar;
use crate::error::{PhotlibError, Result};
use crate::schema::{LibraryFile, LibraryHeader};

/// Reads visibility values from a library file, indexed by voxel and channel.
///
/// The metadata is immutable and shared freely; the file handle and its
/// position register are one piece of mutable state, guarded by a lock that
/// covers exactly the seek-and-read pair. Lookups from parallel threads are
/// atomic with respect to each other; there is no ordering between them.
#[derive(Debug)]
pub struct VoxelReader {
    metadata: LibraryHeader,
    n_voxels: u64,
    n_channels: u64,
    data_offset: u64,
    /// Data file; the lock serialises the seek+read pair of each lookup.
    data: Mutex<File>,
}

impl VoxelReader {
    /// Opens a library file and parses its header.
    ///
    /// The returned reader owns the open file handle until it is dropped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut library = LibraryFile::new(path);
        let metadata = library.read_header()?.clone();
        let data_offset = match library.data_offset() {
            Some(offset) => offset,
            None => return Err(PhotlibError::MissingHeader),
        };

        let file = File::open(path).map_err(|source| PhotlibError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(
            path = %path.display(),
            voxels = metadata.n_voxels,
            channels = metadata.n_channels,
            "opened visibility library"
        );

        Ok(VoxelReader {
            n_voxels: u64::from(metadata.n_voxels),
            n_channels: u64::from(metadata.n_channels),
            data_offset,
            metadata,
            data: Mutex::new(file),
        })
    }

    /// The full library metadata from the file header.
    pub fn metadata(&self) -> &LibraryHeader {
        &self.metadata
    }

    /// Number of voxels in the table.
    pub fn n_voxels(&self) -> u64 {
        self.n_voxels
    }

    /// Number of channels stored for each voxel.
    pub fn n_channels(&self) -> u64 {
        self.n_channels
    }

    /// Total number of stored values.
    pub fn n_entries(&self) -> u64 {
        self.n_voxels * self.n_channels
    }

    /// Whether `voxel` indexes into the table.
    pub fn is_voxel_valid(&self, voxel: u64) -> bool {
        voxel < self.n_voxels
    }

    /// Reads the value for one voxel and channel.
    ///
    /// Out-of-range indices yield `0.0` without touching the file; callers
    /// routinely probe boundary voxels. I/O failures are reported as errors
    /// and leave the reader usable for further lookups.
    pub fn get(&self, voxel: u64, channel: u64) -> Result<f32> {
        if voxel >= self.n_voxels || channel >= self.n_channels {
            return Ok(0.0);
        }
        let mut value = [0.0f32];
        self.read_at(voxel * self.n_channels + channel, &mut value)?;
        Ok(value[0])
    }

    /// Reads the values of all channels of one voxel into a fresh buffer.
    ///
    /// An out-of-range voxel yields `None`; this is not an error.
    pub fn get_voxel(&self, voxel: u64) -> Result<Option<Vec<f32>>> {
        if voxel >= self.n_voxels {
            return Ok(None);
        }
        let mut buffer = vec![0.0f32; self.n_channels as usize];
        self.read_at(voxel * self.n_channels, &mut buffer)?;
        Ok(Some(buffer))
    }

    /// Fills `buffer` with the values of all channels of one voxel.
    ///
    /// Unlike [`get_voxel`](Self::get_voxel) an out-of-range voxel is an
    /// explicit [`PhotlibError::InvalidVoxel`] error here, as is a buffer of
    /// the wrong length.
    pub fn fill_voxel(&self, voxel: u64, buffer: &mut [f32]) -> Result<()> {
        if voxel >= self.n_voxels {
            return Err(PhotlibError::InvalidVoxel(voxel));
        }
        if buffer.len() as u64 != self.n_channels {
            return Err(PhotlibError::Inconsistent {
                field: "voxel buffer length".to_string(),
                expected: format!("{} channels", self.n_channels),
                actual: format!("{} channels", buffer.len()),
            });
        }
        self.read_at(voxel * self.n_channels, buffer)
    }

    /// Reads `buffer.len()` values starting at entry `index`.
    fn read_at(&self, index: u64, buffer: &mut [f32]) -> Result<()> {
        let position = self.data_offset + index * f32::STORED_SIZE;
        let mut data = self.data.lock();
        data.seek(SeekFrom::Start(position))?;
        data.read_f32_into::<NativeEndian>(buffer)?;
        Ok(())
    }
}
