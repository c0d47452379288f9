//! Append-only log for the durable backend.
//!
//! Records are length-prefixed binary commands: `SET{key, value, flags,
//! [expires_at]}` and `DELETE{key}`. Expiry is stored as an absolute unix
//! timestamp so TTLs survive restarts. Replay rebuilds the ordered map on
//! open.

use crate::config::SyncMode;
use crate::error::{FilterError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SCRATCH_INITIAL_CAPACITY: usize = 1024;

/// A single logged command.
#[derive(Debug)]
pub enum LogCommand {
    Set {
        key: Bytes,
        value: Bytes,
        expires_at: Option<SystemTime>,
    },
    Delete {
        key: Bytes,
    },
}

/// Append-only command log.
pub struct AofFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    scratch: BytesMut,
}

impl AofFile {
    const CMD_SET: u8 = 0;
    const CMD_DELETE: u8 = 1;
    const FLAG_HAS_EXPIRATION: u8 = 0b0000_0001;

    /// Open (or create) the log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);

        Ok(AofFile {
            file,
            writer,
            path,
            size,
            scratch: BytesMut::with_capacity(SCRATCH_INITIAL_CAPACITY),
        })
    }

    /// Current log size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a SET command.
    pub fn write_set(
        &mut self,
        key: &[u8],
        value: &[u8],
        expires_at: Option<SystemTime>,
    ) -> Result<()> {
        self.scratch.clear();
        let needed = 1 + 4 + key.len() + 4 + value.len() + 1 + 8;
        if self.scratch.capacity() < needed {
            self.scratch.reserve(needed - self.scratch.capacity());
        }

        self.scratch.put_u8(Self::CMD_SET);
        self.scratch.put_u32(key.len() as u32);
        self.scratch.put(key);
        self.scratch.put_u32(value.len() as u32);
        self.scratch.put(value);

        match expires_at {
            Some(exp) => {
                let secs = exp
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| FilterError::InvalidTimestamp)?
                    .as_secs();
                self.scratch.put_u8(Self::FLAG_HAS_EXPIRATION);
                self.scratch.put_u64(secs);
            }
            None => self.scratch.put_u8(0),
        }

        self.append_scratch()
    }

    /// Append a DELETE command.
    pub fn write_delete(&mut self, key: &[u8]) -> Result<()> {
        self.scratch.clear();
        let needed = 1 + 4 + key.len();
        if self.scratch.capacity() < needed {
            self.scratch.reserve(needed - self.scratch.capacity());
        }

        self.scratch.put_u8(Self::CMD_DELETE);
        self.scratch.put_u32(key.len() as u32);
        self.scratch.put(key);

        self.append_scratch()
    }

    fn append_scratch(&mut self) -> Result<()> {
        self.writer.write_all(&self.scratch)?;
        self.size += self.scratch.len() as u64;
        Ok(())
    }

    /// Read back every command in the log, in append order.
    pub fn replay(&mut self) -> Result<Vec<LogCommand>> {
        self.writer.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut self.file);
        let mut commands = Vec::new();

        loop {
            match Self::read_command(&mut reader) {
                Ok(command) => commands.push(command),
                Err(FilterError::UnexpectedEof) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(commands)
    }

    fn read_command(reader: &mut BufReader<&mut File>) -> Result<LogCommand> {
        let mut tag = [0u8; 1];
        if reader.read_exact(&mut tag).is_err() {
            // Clean end of log: the next record never started.
            return Err(FilterError::UnexpectedEof);
        }

        match tag[0] {
            Self::CMD_SET => {
                let key = Self::read_bytes(reader)?;
                let value = Self::read_bytes(reader)?;

                let mut flags = [0u8; 1];
                reader.read_exact(&mut flags)?;

                let expires_at = if flags[0] & Self::FLAG_HAS_EXPIRATION != 0 {
                    let mut secs = [0u8; 8];
                    reader.read_exact(&mut secs)?;
                    Some(UNIX_EPOCH + Duration::from_secs(u64::from_be_bytes(secs)))
                } else {
                    None
                };

                Ok(LogCommand::Set {
                    key,
                    value,
                    expires_at,
                })
            }
            Self::CMD_DELETE => {
                let key = Self::read_bytes(reader)?;
                Ok(LogCommand::Delete { key })
            }
            _ => Err(FilterError::InvalidFormat),
        }
    }

    fn read_bytes(reader: &mut BufReader<&mut File>) -> Result<Bytes> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Flush buffered writes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and sync to disk using the given mode.
    pub fn sync_with_mode(&mut self, mode: SyncMode) -> Result<()> {
        self.writer.flush()?;
        match mode {
            SyncMode::All => self.file.sync_all()?,
            SyncMode::Data => self.file.sync_data()?,
        }
        Ok(())
    }
}

impl Drop for AofFile {
    fn drop(&mut self) {
        // Best effort flush on drop, ignore errors.
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_empty_log() {
        let temp = NamedTempFile::new().unwrap();
        let aof = AofFile::open(temp.path()).unwrap();
        assert_eq!(aof.size(), 0);
    }

    #[test]
    fn test_replay_preserves_order() {
        let temp = NamedTempFile::new().unwrap();
        let mut aof = AofFile::open(temp.path()).unwrap();

        aof.write_set(b"key1", b"", None).unwrap();
        aof.write_delete(b"key2").unwrap();

        let commands = aof.replay().unwrap();
        assert_eq!(commands.len(), 2);

        match &commands[0] {
            LogCommand::Set {
                key,
                value,
                expires_at,
            } => {
                assert_eq!(key.as_ref(), b"key1");
                assert!(value.is_empty());
                assert!(expires_at.is_none());
            }
            _ => panic!("expected SET"),
        }
        match &commands[1] {
            LogCommand::Delete { key } => assert_eq!(key.as_ref(), b"key2"),
            _ => panic!("expected DELETE"),
        }
    }

    #[test]
    fn test_expiration_round_trip() {
        let temp = NamedTempFile::new().unwrap();
        let mut aof = AofFile::open(temp.path()).unwrap();

        let expires_at = UNIX_EPOCH + Duration::from_secs(1_704_153_600);
        aof.write_set(b"key", b"value", Some(expires_at)).unwrap();

        let commands = aof.replay().unwrap();
        match &commands[0] {
            LogCommand::Set {
                expires_at: exp, ..
            } => assert_eq!(*exp, Some(expires_at)),
            _ => panic!("expected SET"),
        }
    }

    #[test]
    fn test_replay_survives_reopen() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut aof = AofFile::open(temp.path()).unwrap();
            aof.write_set(b"persistent", b"data", None).unwrap();
            aof.sync_with_mode(SyncMode::All).unwrap();
        }

        let mut aof = AofFile::open(temp.path()).unwrap();
        let commands = aof.replay().unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_pre_epoch_expiry_is_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let mut aof = AofFile::open(temp.path()).unwrap();

        let before_epoch = UNIX_EPOCH - Duration::from_secs(1);
        let err = aof.write_set(b"key", b"", Some(before_epoch)).unwrap_err();
        assert!(matches!(err, FilterError::InvalidTimestamp));
    }
}
