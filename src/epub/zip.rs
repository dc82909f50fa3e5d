use std::fmt;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::path::Path;

use bytes::Bytes;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::error::{Result, WattbookError};

pub struct ZipArchive {
    writer: ZipWriter<Cursor<Vec<u8>>>,
}

impl fmt::Debug for ZipArchive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ZipArchive")
    }
}

// Fixed timestamps keep re-serialization of identical input byte-identical.
fn file_options() -> FileOptions {
    FileOptions::default().last_modified_time(zip::DateTime::default())
}

impl ZipArchive {
    pub fn new() -> Result<Self> {
        let mut writer = ZipWriter::new(Cursor::new(vec![]));
        writer.set_comment(""); // Fix issues with some readers

        // The mimetype entry must come first and stay uncompressed.
        writer
            .start_file(
                "mimetype",
                file_options().compression_method(CompressionMethod::Stored),
            )
            .map_err(|err| {
                WattbookError::Serialization(format!("could not create mimetype: {}", err))
            })?;
        writer
            .write_all(b"application/epub+zip")
            .map_err(|err| {
                WattbookError::Serialization(format!("could not write mimetype: {}", err))
            })?;

        Ok(ZipArchive { writer })
    }

    pub fn write_file<P: AsRef<Path>, R: Read>(&mut self, path: P, mut content: R) -> Result<()> {
        let mut file = format!("{}", path.as_ref().display());
        if cfg!(target_os = "windows") {
            // Path names should not use backspaces in zip files
            file = file.replace('\\', "/");
        }
        self.writer
            .start_file(file.clone(), file_options())
            .map_err(|err| {
                WattbookError::Serialization(format!("could not create '{}': {}", file, err))
            })?;
        io::copy(&mut content, &mut self.writer).map_err(|err| {
            WattbookError::Serialization(format!("could not write '{}': {}", file, err))
        })?;
        Ok(())
    }

    pub fn finish(self) -> Result<Bytes> {
        let mut writer = self.writer;
        let cursor = writer
            .finish()
            .map_err(|err| WattbookError::Serialization(format!("error closing zip: {}", err)))?;
        Ok(Bytes::from(cursor.into_inner()))
    }
}
