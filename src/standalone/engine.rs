use anyhow::{Context, Result};
use glob::glob;
use itertools::Itertools;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::*;

/// Expands each input glob spec into the matching files, in order.
///
/// A spec that matches nothing is an error, so typos don't silently
/// produce an empty job.
pub fn expand_inputs(specs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for spec in specs {
        let before = files.len();
        for entry in glob(spec).with_context(|| format!("bad input pattern `{spec}`"))? {
            files.push(entry?);
        }
        if files.len() == before {
            anyhow::bail!("no input matches `{spec}`");
        }
    }
    Ok(files)
}

/// Maps every input, sorts everything by key and reduces each key once.
///
/// Returns `(key, result)` pairs in key order. This is the serial
/// reference the distributed run must agree with.
pub fn perform_sequential(inputs: &[PathBuf], engine: &Workload) -> Result<Vec<KeyValue>> {
    let map_func = engine.map_fn;
    let mut intermediate = Vec::new();
    for pathspec in inputs {
        let contents = fs::read_to_string(pathspec)
            .with_context(|| format!("cannot read {}", pathspec.display()))?;
        let filename = pathspec.to_string_lossy();
        intermediate.extend(map_func(&filename, &contents)?);
    }

    intermediate.sort_by(|a, b| a.key.cmp(&b.key));

    let reduce_func = engine.reduce_fn;
    let mut output = Vec::new();
    for (key, value_group) in &intermediate.into_iter().chunk_by(|kv| kv.key.clone()) {
        let values: Vec<String> = value_group.map(KeyValue::into_value).collect();
        let out = reduce_func(&key, &values)?;
        output.push(KeyValue::new(key, out));
    }
    Ok(output)
}

/// Writes `"<key> <value>\n"` lines to `path`.
pub fn write_output(path: &Path, output: &[KeyValue]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for kv in output {
        writeln!(out, "{} {}", kv.key, kv.value)?;
    }
    out.flush()?;
    Ok(())
}
