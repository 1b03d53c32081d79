//! Reader-backed sources: inline values, JSON lines, text lines and
//! directory listings.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex_lite::Regex;
use serde_json::{json, Value};

use crate::cabinet::{BuildContext, SourceJar};
use crate::definition::JarSpec;
use crate::error::FlowError;
use crate::flow::{reader_flow, Flow, RecordReader};

/// `file://` URL of a path, made absolute without touching the filesystem.
pub fn file_url(path: &Path) -> Result<String, FlowError> {
    let absolute = std::path::absolute(path)?;
    Ok(format!("file://{}", absolute.display()))
}

/// Resolves the `path` option, falling back to a `file://` `sourceUrl`.
fn file_path(spec: &JarSpec) -> Result<PathBuf, FlowError> {
    if let Some(path) = spec.str_option("path")? {
        return Ok(PathBuf::from(path));
    }
    match spec.str_option("sourceUrl")? {
        Some(url) => url
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| FlowError::invalid("sourceUrl", "expected a file:// URL")),
        None => Err(FlowError::missing("path")),
    }
}

fn source_url(spec: &JarSpec, path: &Path) -> Result<String, FlowError> {
    match spec.str_option("sourceUrl")? {
        Some(url) => Ok(url.to_string()),
        None => file_url(path),
    }
}

fn boxed<R: RecordReader>(reader: R) -> Box<dyn RecordReader> {
    Box::new(reader)
}

// =============================================================================
// values
// =============================================================================

/// Replays the inline `values` list.
pub struct ValuesSourceJar;

impl SourceJar for ValuesSourceJar {
    fn new_source(&self, spec: &JarSpec, build: &BuildContext<'_>) -> Result<Flow, FlowError> {
        let values = match spec.option("values") {
            Some(Value::Array(values)) => Arc::new(values.clone()),
            Some(_) => return Err(FlowError::invalid("values", "expected a list")),
            None => return Err(FlowError::missing("values")),
        };
        let url = match spec.str_option("sourceUrl")? {
            Some(url) => url.to_string(),
            None => format!(
                "values:{}/{}",
                build.definition.display_name(),
                spec.display_name()
            ),
        };

        Ok(reader_flow(url, move || {
            Ok(boxed(ValuesReader::new(Arc::clone(&values))))
        }))
    }
}

/// Cursor over an in-memory list.
pub struct ValuesReader {
    values: Arc<Vec<Value>>,
    cursor: usize,
}

impl ValuesReader {
    pub fn new(values: Arc<Vec<Value>>) -> Self {
        Self { values, cursor: 0 }
    }
}

impl RecordReader for ValuesReader {
    fn read_next(&mut self) -> Result<Option<Value>, FlowError> {
        let value = self.values.get(self.cursor).cloned();
        if value.is_some() {
            self.cursor += 1;
        }
        Ok(value)
    }

    fn skip(&mut self, n: u64) -> Result<u64, FlowError> {
        let remaining = (self.values.len() - self.cursor) as u64;
        let skipped = n.min(remaining);
        self.cursor += skipped as usize;
        Ok(skipped)
    }
}

// =============================================================================
// jsonl / lines
// =============================================================================

/// One JSON document per non-blank line.
pub struct JsonLinesSourceJar;

impl SourceJar for JsonLinesSourceJar {
    fn new_source(&self, spec: &JarSpec, _build: &BuildContext<'_>) -> Result<Flow, FlowError> {
        let path = file_path(spec)?;
        let url = source_url(spec, &path)?;
        Ok(reader_flow(url, move || {
            Ok(boxed(LineReader::open(&path, LineFormat::Json)?))
        }))
    }
}

/// One string item per line.
pub struct LinesSourceJar;

impl SourceJar for LinesSourceJar {
    fn new_source(&self, spec: &JarSpec, _build: &BuildContext<'_>) -> Result<Flow, FlowError> {
        let path = file_path(spec)?;
        let url = source_url(spec, &path)?;
        Ok(reader_flow(url, move || {
            Ok(boxed(LineReader::open(&path, LineFormat::Text)?))
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineFormat {
    Json,
    Text,
}

/// Line-oriented file reader. Skipping never parses.
struct LineReader {
    lines: Lines<BufReader<File>>,
    format: LineFormat,
}

impl LineReader {
    fn open(path: &Path, format: LineFormat) -> Result<Self, FlowError> {
        let file = File::open(path).map_err(|e| {
            FlowError::Io(io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            format,
        })
    }

    /// Next line that counts as a record.
    fn next_line(&mut self) -> Result<Option<String>, FlowError> {
        for line in self.lines.by_ref() {
            let line = line?;
            if self.format == LineFormat::Json && line.trim().is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
        Ok(None)
    }
}

impl RecordReader for LineReader {
    fn read_next(&mut self) -> Result<Option<Value>, FlowError> {
        match self.next_line()? {
            Some(line) => match self.format {
                LineFormat::Json => Ok(Some(serde_json::from_str(&line)?)),
                LineFormat::Text => Ok(Some(Value::String(line))),
            },
            None => Ok(None),
        }
    }

    fn skip(&mut self, n: u64) -> Result<u64, FlowError> {
        let mut skipped = 0;
        while skipped < n && self.next_line()?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }
}

// =============================================================================
// directory
// =============================================================================

/// Emits `{"resourceUrl": "file://..."}` for every file below `path` whose
/// path matches the optional `filter` regex, in sorted order.
pub struct DirectorySourceJar;

impl SourceJar for DirectorySourceJar {
    fn new_source(&self, spec: &JarSpec, _build: &BuildContext<'_>) -> Result<Flow, FlowError> {
        let directory = PathBuf::from(spec.require_str("path")?);
        let filter = match spec.str_option("filter")? {
            Some(pattern) => Some(
                Regex::new(pattern).map_err(|e| FlowError::invalid("filter", e.to_string()))?,
            ),
            None => None,
        };
        let url = source_url(spec, &directory)?;

        Ok(reader_flow(url, move || {
            let mut files = Vec::new();
            walk(&directory, &mut files)?;
            files.retain(|path| match &filter {
                Some(filter) => filter.is_match(&path.to_string_lossy()),
                None => true,
            });
            files.sort();

            let resources = files
                .iter()
                .map(|path| file_url(path).map(|url| json!({ "resourceUrl": url })))
                .collect::<Result<Vec<Value>, FlowError>>()?;
            Ok(boxed(ValuesReader::new(Arc::new(resources))))
        }))
    }
}

fn walk(directory: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
