//! DCA file reader
//!
//! DCA is a container of pre-encoded Opus frames:
//!
//! ```text
//! [ "DCA1" | metadata len (i32 LE) | JSON metadata ]   optional
//! [ frame len (i16 LE) | opus frame ] ...
//! ```
//!
//! Files without the `DCA1` magic are the legacy headerless variant.

use std::fs::File;
use std::io::{BufReader, Chain, Cursor, ErrorKind, Read};
use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use crate::codec::opus::MAX_FRAME_SIZE;
use crate::error::{CodecError, Error, Result};

const MAGIC: &[u8; 4] = b"DCA1";
const MAX_METADATA_LEN: usize = 1 << 20;

/// Iterator over the Opus frames of a DCA stream
pub struct DcaReader<R> {
    reader: Chain<Cursor<Vec<u8>>, R>,
    metadata: Option<serde_json::Value>,
    finished: bool,
}

impl DcaReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Self::new(BufReader::new(File::open(path)?))?;
        debug!(path = %path.display(), has_metadata = reader.metadata.is_some(), "opened DCA file");
        Ok(reader)
    }
}

impl<R: Read> DcaReader<R> {
    /// Read the header, if any. Frames are read lazily.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut head = [0u8; 4];
        let read = read_full(&mut reader, &mut head)?;

        if read < 4 || &head != MAGIC {
            // headerless: what we peeked is the start of the first frame
            return Ok(Self {
                reader: Cursor::new(head[..read].to_vec()).chain(reader),
                metadata: None,
                finished: false,
            });
        }

        let mut len = [0u8; 4];
        if read_full(&mut reader, &mut len)? != len.len() {
            return Err(malformed("truncated metadata length"));
        }
        let len = i32::from_le_bytes(len);
        if len < 0 || len as usize > MAX_METADATA_LEN {
            return Err(malformed(format!("metadata length {}", len)));
        }

        let mut json = vec![0u8; len as usize];
        if read_full(&mut reader, &mut json)? != json.len() {
            return Err(malformed("truncated metadata"));
        }
        let metadata = serde_json::from_slice(&json).map_err(|e| malformed(format!("metadata: {}", e)))?;

        Ok(Self {
            reader: Cursor::new(Vec::new()).chain(reader),
            metadata: Some(metadata),
            finished: false,
        })
    }

    /// JSON metadata block, when the stream has one
    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    /// Read the next frame; `None` at a clean end of stream
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }

        let mut len = [0u8; 2];
        match read_full(&mut self.reader, &mut len)? {
            0 => {
                self.finished = true;
                return Ok(None);
            }
            2 => {}
            _ => {
                self.finished = true;
                return Err(malformed("truncated frame header"));
            }
        }

        let len = i16::from_le_bytes(len);
        if len < 0 || len as usize > MAX_FRAME_SIZE {
            self.finished = true;
            return Err(malformed(format!("frame length {}", len)));
        }

        let mut frame = vec![0u8; len as usize];
        if read_full(&mut self.reader, &mut frame)? != frame.len() {
            self.finished = true;
            return Err(malformed("truncated frame"));
        }

        Ok(Some(Bytes::from(frame)))
    }
}

impl<R: Read> Iterator for DcaReader<R> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    CodecError::MalformedDca(reason.into()).into()
}

/// Fill `buf` as far as the stream allows, returning the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
