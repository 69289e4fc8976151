//! Scoped staging of uploaded voice references.
//!
//! Models take the reference voice as a file path, so an uploaded blob has to
//! be written to disk for the duration of one synthesis call. The file is
//! removed by [`StagedVoice::remove`], or on drop if the caller unwinds.

use std::{
    io::{self, Write},
    path::Path,
};

use tempfile::NamedTempFile;

pub struct StagedVoice {
    file: NamedTempFile,
}

impl StagedVoice {
    /// Write `bytes` to a fresh temp file, in `dir` if given
    pub fn stage(bytes: &[u8], dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tts-voice-").suffix(".wav");
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file now, reporting failure instead of ignoring it like drop does
    pub fn remove(self) -> io::Result<()> {
        self.file.close()
    }
}
