//! Advisory single-instance lockfile (spec §6 "at most one daemon process
//! per data directory"). Grounded in `common/lockfile.cc`: an exclusive
//! `fcntl(F_SETLK)` lock on a file the directory always contains, with the
//! holder's pid written inside so `isalive`/`kill` can find it without a
//! second IPC channel.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{Result, Status};

pub struct Lockfile {
    path: PathBuf,
    file: std::fs::File,
}

impl Lockfile {
    /// Attempts to take the exclusive lock, writing our pid into the file
    /// on success. Returns `Status::Locked` if another process holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;

        let lock = libc::flock { l_type: libc::F_WRLCK as i16, l_whence: libc::SEEK_SET as i16, l_start: 0, l_len: 0, l_pid: 0 };
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &lock) };
        if rc != 0 {
            return Err(Status::Locked);
        }

        let mut file = file;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { path, file })
    }

    /// Reads the pid recorded by whoever currently holds (or last held)
    /// the lockfile, without taking the lock itself.
    pub fn read_pid(path: impl AsRef<Path>) -> Result<u32> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        text.trim().parse().map_err(|_| Status::Invalid)
    }

    /// Whether the process recorded in the lockfile is still alive, probed
    /// with a zero-signal `kill` the way `isalive` does.
    pub fn is_holder_alive(path: impl AsRef<Path>) -> Result<bool> {
        let pid = Self::read_pid(path)?;
        let rc = unsafe { libc::kill(pid as i32, 0) };
        Ok(rc == 0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = std::fs::remove_file(&self.path);
    }
}
