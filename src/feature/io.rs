//! Binary persistence of feature vector collections.
//!
//! Layout (little-endian):
//!
//! ```text
//! "MHFV" | version: u32 | payload length: u64 | bincode payload | crc32(payload): u32
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::error::{MalheurError, Result};
use crate::feature::collection::FeatureVectorCollection;

const MAGIC: &[u8; 4] = b"MHFV";
const FORMAT_VERSION: u32 = 1;

/// Write a collection to any writer.
pub fn write_collection<W: Write>(
    output: &mut W,
    collection: &FeatureVectorCollection,
) -> Result<()> {
    let payload = bincode::serialize(collection)?;

    output.write_all(MAGIC)?;
    output.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    output.write_u64::<LittleEndian>(payload.len() as u64)?;
    output.write_all(&payload)?;
    output.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    Ok(())
}

/// Read a collection written by [`write_collection`].
pub fn read_collection<R: Read>(input: &mut R) -> Result<FeatureVectorCollection> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).map_err(truncated)?;
    if &magic != MAGIC {
        return Err(MalheurError::data("not a feature vector file (bad magic)"));
    }

    let version = input.read_u32::<LittleEndian>().map_err(truncated)?;
    if version != FORMAT_VERSION {
        return Err(MalheurError::data(format!(
            "unsupported feature vector format version {version}"
        )));
    }

    let len = input.read_u64::<LittleEndian>().map_err(truncated)?;
    let len = usize::try_from(len)
        .map_err(|_| MalheurError::resource("feature vector payload", len as u128))?;
    let mut payload = Vec::new();
    payload
        .try_reserve_exact(len)
        .map_err(|_| MalheurError::resource("feature vector payload", len as u128))?;
    input.take(len as u64).read_to_end(&mut payload)?;
    if payload.len() != len {
        return Err(MalheurError::data(format!(
            "truncated feature vector payload: expected {len} bytes, found {}",
            payload.len()
        )));
    }

    let expected = input.read_u32::<LittleEndian>().map_err(truncated)?;
    let actual = crc32fast::hash(&payload);
    if expected != actual {
        return Err(MalheurError::data(format!(
            "checksum mismatch: expected {expected:08x}, computed {actual:08x}"
        )));
    }

    let collection: FeatureVectorCollection = bincode::deserialize(&payload)?;
    collection.validate(usize::MAX)?;
    if let Some(pos) = collection.vectors().iter().position(|v| !v.is_well_formed()) {
        return Err(MalheurError::data(format!(
            "malformed feature vector at position {pos}"
        )));
    }
    Ok(collection)
}

/// Maps a short read to a DataError.
fn truncated(error: io::Error) -> MalheurError {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        MalheurError::data("truncated feature vector file")
    } else {
        MalheurError::Io(error)
    }
}

/// Save a collection to a file.
pub fn save_collection<P: AsRef<Path>>(path: P, collection: &FeatureVectorCollection) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    write_collection(&mut writer, collection)?;
    writer.flush()?;
    debug!("Saved {} feature vectors to {}", collection.len(), path.display());
    Ok(())
}

/// Load a collection from a file.
pub fn load_collection<P: AsRef<Path>>(path: P) -> Result<FeatureVectorCollection> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        MalheurError::data(format!("could not open '{}': {e}", path.display()))
    })?;
    let collection = read_collection(&mut BufReader::new(file))?;
    debug!(
        "Loaded {} feature vectors from {}",
        collection.len(),
        path.display()
    );
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::vector::FeatureVector;

    fn sample() -> FeatureVectorCollection {
        let mut collection = FeatureVectorCollection::new();
        collection.push(
            FeatureVector::from_entries(vec![(3, 1.0), (17, 0.25)]).unwrap(),
            "worm",
            "a.txt",
        );
        collection.push(FeatureVector::new(), "", "b.txt");
        collection
    }

    #[test]
    fn test_round_trip_in_memory() {
        let collection = sample();
        let mut buffer = Vec::new();
        write_collection(&mut buffer, &collection).unwrap();

        let loaded = read_collection(&mut buffer.as_slice()).unwrap();
        assert_eq!(loaded, collection);
        assert_eq!(loaded.vector(0).unwrap().norm(), collection.vector(0).unwrap().norm());
    }

    #[test]
    fn test_detects_corruption() {
        let mut buffer = Vec::new();
        write_collection(&mut buffer, &sample()).unwrap();

        let mut corrupted = buffer.clone();
        let middle = 16 + (corrupted.len() - 20) / 2;
        corrupted[middle] ^= 0xff;
        assert!(read_collection(&mut corrupted.as_slice()).unwrap_err().is_data());

        let mut bad_magic = buffer;
        bad_magic[0] = b'X';
        assert!(read_collection(&mut bad_magic.as_slice()).unwrap_err().is_data());
    }

    #[test]
    fn test_short_files_are_data_errors() {
        let mut buffer = Vec::new();
        write_collection(&mut buffer, &sample()).unwrap();

        for len in [0, 2, 4, 10, 16, buffer.len() - 20, buffer.len() - 2] {
            let error = read_collection(&mut &buffer[..len]).unwrap_err();
            assert!(error.is_data(), "length {len}: {error}");
        }
    }
}
