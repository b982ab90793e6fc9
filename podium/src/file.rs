//! JSON file utilities.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Error, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{from_reader, to_writer_pretty};

/// Reads a JSON-encoded type from a given file `path`.
pub fn read_json<D: DeserializeOwned>(path: impl AsRef<Path>) -> Result<D, Error> {
    let file = File::open(path)?;
    Ok(from_reader(BufReader::new(file))?)
}

/// As per [read_json], but a missing file yields `None`.
pub fn read_json_opt<D: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<D>, Error> {
    match File::open(path) {
        Ok(file) => Ok(Some(from_reader(BufReader::new(file))?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// JSON-encodes the `value` in pretty-printed form and writes it to a given `path`.
pub fn write_json(path: impl AsRef<Path>, value: &impl Serialize) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    to_writer_pretty(&mut writer, value)?;
    writer.flush()
}

/// Writes the `value` to a sibling temporary file and renames it over `path`, so that readers
/// observe either the previous contents or the new contents in full.
pub fn write_json_atomic(path: impl AsRef<Path>, value: &impl Serialize) -> Result<(), Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let temp = temp_path(path);
    let written = (|| {
        let file = File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    })();
    if let Err(err) = written.and_then(|_| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut file_name = path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".tmp");
    path.with_file_name(file_name)
}
