/**************************************************************************/
/*  This file is part of POLYCOUNT.                                       */
/*                                                                        */
/*  Copyright (C) 2025                                                    */
/*    CEA (Commissariat à l'énergie atomique et aux énergies              */
/*         alternatives)                                                  */
/*                                                                        */
/*  you can redistribute it and/or modify it under the terms of the GNU   */
/*  Lesser General Public License as published by the Free Software       */
/*  Foundation, version 2.1.                                              */
/*                                                                        */
/*  It is distributed in the hope that it will be useful,                 */
/*  but WITHOUT ANY WARRANTY; without even the implied warranty of        */
/*  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the         */
/*  GNU Lesser General Public License for more details.                   */
/*                                                                        */
/*  See the GNU Lesser General Public License version 2.1                 */
/*  for more details (enclosed in the file licenses/LGPLv2.1).            */
/*                                                                        */
/**************************************************************************/

//! Misc utils.

use anyhow::Context;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

/// Returns whether a message with this level would be printed
pub fn would_log(level: tracing::Level) -> bool {
    level < tracing::level_filters::LevelFilter::current()
}

/// A temporary file in a chosen directory, removed on drop unless debugging
/// is enabled, in which case it is persisted and its path logged.
pub enum PersistableTempFile {
    /// The file will be removed
    Temp(tempfile::NamedTempFile),
    /// The file is persistent: file descriptor and path
    Persistent(File, std::path::PathBuf),
}

impl PersistableTempFile {
    /// Creates a temporary file under `dir`, cleaned up on drop when
    /// debugging is not enabled. Prefix and extension can be chosen
    /// (extension includes the leading dot).
    pub fn new_in(dir: &Path, prefix: &str, extension: &str) -> anyhow::Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(extension)
            .tempfile_in(dir)
            .with_context(|| format!("creating a temporary file in {}", dir.display()))?;
        if would_log(tracing::Level::DEBUG) {
            let (file, path) = temp.keep().context("persisting temporary file")?;
            trace!("persisting temporary data to {}", path.display());
            Ok(Self::Persistent(file, path))
        } else {
            Ok(Self::Temp(temp))
        }
    }

    /// Returns the underlying File.
    pub fn as_file_mut(&mut self) -> &mut File {
        match self {
            PersistableTempFile::Temp(file) => file.as_file_mut(),
            PersistableTempFile::Persistent(file, _) => file,
        }
    }
}

impl Write for PersistableTempFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.as_file_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.as_file_mut().flush()
    }
}

impl AsRef<Path> for PersistableTempFile {
    fn as_ref(&self) -> &Path {
        match self {
            PersistableTempFile::Persistent(_, path) => path.as_ref(),
            PersistableTempFile::Temp(file) => file.as_ref(),
        }
    }
}

/// keep at most this much of a tool's output
const CAPTURE_CAP: usize = 64 * 1024;

/// Consumes the reading end of a pipe on a thread so the child process never
/// blocks on a full pipe. Keeps the last [`CAPTURE_CAP`] bytes read: back-end
/// results sit in the final tokens of stdout.
pub struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Arc<std::sync::atomic::AtomicBool>,
}

impl PipeCapture {
    /// Spawns a thread draining `read` until end of stream.
    pub fn new<R: Read + Send + 'static>(mut read: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let res = Self {
            buf: buf.clone(),
            done: done.clone(),
        };
        std::thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match read.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut inner = buf.lock().expect("poisoned capture lock");
                        inner.extend_from_slice(&chunk[..n]);
                        let len = inner.len();
                        if len > 2 * CAPTURE_CAP {
                            inner.drain(..len - CAPTURE_CAP);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
            done.store(true, std::sync::atomic::Ordering::Release);
        });
        res
    }

    /// Waits until the stream reaches end of file, at most `timeout`. Called
    /// after the child exited so the tail of its output is not raced away.
    pub fn wait_done(&self, timeout: Duration) {
        let mut waited = Duration::from_secs(0);
        let interval = Duration::from_millis(10);
        while !self.done.load(std::sync::atomic::Ordering::Acquire) && waited < timeout {
            std::thread::sleep(interval);
            waited += interval;
        }
    }

    /// The bytes captured so far.
    pub fn get(&self) -> Vec<u8> {
        self.buf.lock().expect("poisoned capture lock").clone()
    }
}

/// Wait for a process for at most the specified duration
pub fn try_wait_timeout(
    process: &mut std::process::Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let mut waited = Duration::from_secs(0);
    let interval = Duration::from_millis(50);
    loop {
        if let Some(e) = process.try_wait()? {
            return Ok(Some(e));
        }
        if waited >= timeout {
            return Ok(None);
        }
        std::thread::sleep(interval);
        waited += interval;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capture_keeps_the_tail() {
        let data: Vec<u8> = (0..(3 * CAPTURE_CAP))
            .map(|i| (i % 251) as u8)
            .collect();
        let capture = PipeCapture::new(std::io::Cursor::new(data.clone()));
        std::thread::sleep(Duration::from_millis(300));
        let got = capture.get();
        assert!(got.len() >= CAPTURE_CAP);
        assert_eq!(&got[got.len() - 16..], &data[data.len() - 16..]);
    }

    #[test]
    fn temp_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = PersistableTempFile::new_in(dir.path(), "poly", ".ine").unwrap();
        f.write_all(b"begin\nend\n").unwrap();
        f.flush().unwrap();
        let content = std::fs::read_to_string(f.as_ref() as &Path).unwrap();
        assert_eq!(content, "begin\nend\n");
    }

    #[test]
    fn wait_timeout_expires() {
        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .unwrap();
        let waited = try_wait_timeout(&mut child, Duration::from_millis(200)).unwrap();
        assert!(waited.is_none());
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
