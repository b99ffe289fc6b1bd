use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use glob::{glob, Pattern};
use itertools::Itertools;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::codec::{self, intermediate_name, output_name, parse_intermediate_name};
use crate::*;

// types related to this engine
type BucketIndex = u32;
type Buckets = FnvHashMap<BucketIndex, Vec<u8>>;

/// Runs map task `map_id` over `filename` and writes one intermediate
/// file per partition the map function touched.
///
/// A re-executed task replaces the files of the earlier attempt.
///
/// Returns the number of intermediate files written.
pub fn perform_map(
    filename: &str,
    map_id: u32,
    n_reduce: u32,
    engine: &Workload,
    work_dir: &Path,
) -> Result<usize> {
    if n_reduce == 0 {
        return Err(MrError::InvalidJob {
            reason: "the number of reduce partitions must be positive".into(),
        });
    }
    let contents = fs::read_to_string(filename).map_err(|e| MrError::io(filename, e))?;
    let map_func = engine.map_fn;
    let records = map_func(filename, &contents).map_err(|source| MrError::Workload {
        kind: TaskKind::Map,
        source,
    })?;

    // Each record lands in the bucket of its partition; untouched
    // partitions get no file at all.
    let mut buckets = Buckets::default();
    for kv in &records {
        let bucket_no = codec::partition(&kv.key, n_reduce);
        let bucket = buckets.entry(bucket_no).or_default();
        codec::encode(bucket, kv)
            .map_err(|e| MrError::io(work_dir.join(intermediate_name(map_id, bucket_no)), e))?;
    }

    let published = buckets.len();
    for (bucket_no, data) in buckets {
        publish(work_dir, &intermediate_name(map_id, bucket_no), &data)?;
    }
    debug!(input = filename, records = records.len(), files = published, "map done");
    Ok(published)
}

/// Runs reduce task `reduce_id`: reads every intermediate file of that
/// partition in `work_dir`, groups by key and writes `mr-out-<reduce_id>`.
///
/// Returns the number of distinct keys written.
pub fn perform_reduce(reduce_id: u32, engine: &Workload, work_dir: &Path) -> Result<usize> {
    let mut bkt = Vec::new();
    let inputs = intermediate_files(work_dir, reduce_id)?;
    for path in &inputs {
        let file = File::open(path).map_err(|e| MrError::io(path, e))?;
        codec::decode_into(BufReader::new(file), path, &mut bkt)?;
    }

    // Stable, so values of one key keep their file order.
    bkt.sort_by(|a, b| a.key.cmp(&b.key));

    let reduce_func = engine.reduce_fn;
    let out_name = output_name(reduce_id);
    let mut out = Vec::new();
    let mut keys = 0;
    for (key, value_group) in &bkt.into_iter().chunk_by(|kv| kv.key.clone()) {
        let values: Vec<String> = value_group.map(KeyValue::into_value).collect();
        let result = reduce_func(&key, &values).map_err(|source| MrError::Workload {
            kind: TaskKind::Reduce,
            source,
        })?;
        writeln!(out, "{key} {result}").map_err(|e| MrError::io(work_dir.join(&out_name), e))?;
        keys += 1;
    }

    publish(work_dir, &out_name, &out)?;
    debug!(partition = reduce_id, inputs = inputs.len(), keys, "reduce done");
    Ok(keys)
}

/// Every `mr-<map>-<partition>` file in `work_dir`, ordered by map task.
pub fn intermediate_files(work_dir: &Path, partition: u32) -> Result<Vec<PathBuf>> {
    let dir = Pattern::escape(&work_dir.to_string_lossy());
    let pattern = format!("{dir}/mr-*-{partition}");
    let entries = glob(&pattern).map_err(|e| MrError::InvalidJob {
        reason: format!("bad working directory pattern {pattern}: {e}"),
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            MrError::io(path, e.into_error())
        })?;
        let parsed = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_intermediate_name);
        // The pattern also matches output files and longer partition numbers.
        if let Some((map_id, p)) = parsed {
            if p == partition {
                found.push((map_id, path));
            }
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Deletes every `mr-<map>-<partition>` file in `work_dir`.
///
/// Run before a job starts so a reduce scan never sees files left over
/// from an earlier job. Returns how many files were removed.
pub fn remove_intermediate_files(work_dir: &Path) -> Result<usize> {
    let dir = Pattern::escape(&work_dir.to_string_lossy());
    let pattern = format!("{dir}/mr-*-*");
    let entries = glob(&pattern).map_err(|e| MrError::InvalidJob {
        reason: format!("bad working directory pattern {pattern}: {e}"),
    })?;

    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            MrError::io(path, e.into_error())
        })?;
        let intermediate = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_intermediate_name)
            .is_some();
        if !intermediate {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(MrError::io(path, e)),
        }
    }
    Ok(removed)
}

/// Writes `data` to a temporary file in `work_dir` and atomically renames
/// it onto `name`, replacing whatever was there.
fn publish(work_dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    let target = work_dir.join(name);
    let mut tmp = NamedTempFile::new_in(work_dir).map_err(|e| MrError::io(work_dir, e))?;
    tmp.write_all(data).map_err(|e| MrError::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| MrError::io(tmp.path(), e))?;
    tmp.persist(&target)
        .map_err(|e| MrError::io(&target, e.error))?;
    Ok(())
}
