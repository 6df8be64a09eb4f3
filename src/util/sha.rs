use std::fs::File;
use std::io;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex encoded sha256 of a byte slice.
pub fn bytes_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(&hasher.finalize()[..])
}

/// Hex encoded sha256 of everything `reader` yields, read in chunks.
pub fn reader_sha256<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(hex::encode(&hasher.finalize()[..]))
}

/// Hex encoded sha256 of a file, streamed without loading it into memory.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    reader_sha256(&mut file)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn known_vector() {
        let expected = hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(bytes_sha256(b"abc"), hex::encode(expected));
        assert_eq!(reader_sha256(&mut &b"abc"[..]).unwrap(), hex::encode(expected));
    }
}
