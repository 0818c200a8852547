//! Append-only newline-delimited log with atomic rewrite.
//!
//! Appends are flushed and fsynced before returning. A rewrite goes through
//! a temp file in the same directory: write, fsync, rename over the live
//! file, fsync the directory. The temp file never survives a failed rewrite.

use std::fs::{self, create_dir_all, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::fault::inject::{injected_error, FaultProfile};

#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Last record may be incomplete; prefix the next one with a newline.
    torn: bool,
    /// Handle lost after a rewrite; appends would go to an unlinked file.
    poisoned: bool,
    faults: FaultProfile,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let torn = !ends_with_newline(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            torn,
            poisoned: false,
            faults: FaultProfile::disabled(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_faults(&mut self, faults: FaultProfile) {
        self.faults = faults;
    }

    /// Append one record line and fsync.
    pub fn append(&mut self, line: &str) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("log {} lost its handle after a rewrite", self.path.display()),
            ));
        }
        let mut buf = Vec::with_capacity(line.len() + 2);
        if self.torn {
            buf.push(b'\n');
        }
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let fault = if self.faults.is_disabled() {
            None
        } else {
            self.faults.take_append_fault()
        };
        if let Some(torn_bytes) = fault {
            let n = torn_bytes.min(buf.len().saturating_sub(1));
            if n > 0 {
                self.file.write_all(&buf[..n])?;
                self.file.flush()?;
                self.torn = true;
            }
            return Err(injected_error("append"));
        }

        let res = self
            .file
            .write_all(&buf)
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_all());
        match res {
            Ok(()) => {
                self.torn = false;
                Ok(())
            }
            Err(err) => {
                // Unknown how many bytes landed.
                self.torn = true;
                Err(err)
            }
        }
    }

    /// Raw lines of the log, without the trailing newline. Empty lines are dropped.
    pub fn replay(path: &Path) -> io::Result<Vec<Vec<u8>>> {
        if !path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(File::open(path)?);
        let mut lines = Vec::new();
        for line in reader.split(b'\n') {
            let line = line?;
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            lines.push(line);
        }
        Ok(lines)
    }

    /// Atomically replace the log contents with `lines` and reopen for append.
    ///
    /// Once the rename has happened the handle is always moved to the new
    /// file, even if the directory sync fails. If that reopen fails the log
    /// is poisoned and every later append errors.
    pub fn rewrite<I, S>(&mut self, lines: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tmp = temp_path(&self.path);
        if let Err(err) = write_temp(&tmp, lines) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        if self.faults.take_compaction_fault() {
            let _ = fs::remove_file(&tmp);
            return Err(injected_error("compaction"));
        }
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        // The old inode is unlinked from here on.
        let synced = if self.faults.take_post_rename_fault() {
            Err(injected_error("directory sync"))
        } else {
            sync_dir(&self.path)
        };
        let reopened = self.reopen();
        synced.and(reopened)
    }

    fn reopen(&mut self) -> io::Result<()> {
        match OpenOptions::new().append(true).open(&self.path) {
            Ok(file) => {
                self.file = file;
                self.torn = false;
                self.poisoned = false;
                Ok(())
            }
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }
}

fn write_temp<I, S>(tmp: &Path, lines: I) -> io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp)?;
    for line in lines {
        out.write_all(line.as_ref().as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    out.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wal".to_string());
    path.with_file_name(format!(".{}.compact.tmp", name))
}

fn ends_with_newline(path: &Path) -> io::Result<bool> {
    let mut f = File::open(path)?;
    if f.metadata()?.len() == 0 {
        return Ok(true);
    }
    f.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    f.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
