//! The partition codec: key to partition assignment, the line-oriented
//! record format of intermediate files and the file naming scheme.
//!
//! Everything here is a cross-process contract. Two workers, in any
//! language, must agree on the partition of a key and on the bytes of an
//! intermediate file.

use std::io::{BufRead, Write};
use std::path::Path;

use crate::{KeyValue, MrError, Result};

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// Hashes an intermediate key with 32-bit FNV-1a, masked to be
/// non-negative. Compute a reduce bucket for a given key by calculating
/// `ihash(key) % n_reduce`, or use [`partition`].
pub fn ihash(key: &[u8]) -> u32 {
    let hash = key.iter().fold(FNV32_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV32_PRIME)
    });
    hash & 0x7fff_ffff
}

/// The reduce partition `key` belongs to. `n_reduce` must be non-zero.
#[inline]
pub fn partition(key: &str, n_reduce: u32) -> u32 {
    ihash(key.as_bytes()) % n_reduce
}

/// Name of the intermediate file map task `map` writes for `partition`.
pub fn intermediate_name(map: u32, partition: u32) -> String {
    format!("mr-{map}-{partition}")
}

/// Name of the final output file of reduce `partition`.
pub fn output_name(partition: u32) -> String {
    format!("mr-out-{partition}")
}

/// Parses `mr-<map>-<partition>` back into its two ordinals.
///
/// Returns [`None`] for anything else, output files included.
pub fn parse_intermediate_name(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix("mr-")?;
    let (map, partition) = rest.split_once('-')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(map) || !all_digits(partition) {
        return None;
    }
    Some((map.parse().ok()?, partition.parse().ok()?))
}

/// Writes one record as a single JSON line.
pub fn encode<W: Write>(mut writer: W, kv: &KeyValue) -> std::io::Result<()> {
    serde_json::to_writer(&mut writer, kv)?;
    writer.write_all(b"\n")
}

/// Reads every record from `reader`, appending them to `out`.
///
/// `path` is only used to report where a malformed line was found.
pub fn decode_into<R: BufRead>(reader: R, path: &Path, out: &mut Vec<KeyValue>) -> Result<()> {
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| MrError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let kv = serde_json::from_str(&line).map_err(|source| MrError::Decode {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        out.push(kv);
    }
    Ok(())
}
