use crate::error::{Error, Result};
use crate::sstable::SSTableMeta;

// Field tags in an encoded edit. One byte each; fields may appear in any
// order and the add/delete tags repeat.
const TAG_LOG_NUMBER: u8 = 1;
const TAG_NEXT_FILE_NUMBER: u8 = 2;
const TAG_LAST_SEQUENCE: u8 = 3;
const TAG_ADDED_TABLE: u8 = 4;
const TAG_DELETED_TABLE: u8 = 5;

/// One atomic change to the database's file state.
///
/// Every flush and compaction is published as a single edit appended to
/// the manifest: the tables it added, the tables it replaced, and the new
/// watermarks (WAL segment, file number counter, sequence counter). Replay
/// of all edits in order reconstructs the exact set of live files, which
/// is how recovery works.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VersionEdit {
    /// Oldest WAL segment still needed. Segments below this are garbage.
    pub log_number: Option<u64>,
    /// File number counter watermark, so recovery never reuses an id.
    pub next_file_number: Option<u64>,
    /// Newest sequence number covered by flushed tables.
    pub last_sequence: Option<u64>,
    /// Tables this edit adds; each meta carries its level.
    pub added: Vec<SSTableMeta>,
    /// Tables this edit removes: (level, table id).
    pub deleted: Vec<(u32, u64)>,
}

impl VersionEdit {
    pub fn add_table(&mut self, meta: SSTableMeta) {
        self.added.push(meta);
    }

    pub fn delete_table(&mut self, level: u32, id: u64) {
        self.deleted.push((level, id));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(n) = self.log_number {
            buf.push(TAG_LOG_NUMBER);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        if let Some(n) = self.next_file_number {
            buf.push(TAG_NEXT_FILE_NUMBER);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        if let Some(n) = self.last_sequence {
            buf.push(TAG_LAST_SEQUENCE);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        for meta in &self.added {
            buf.push(TAG_ADDED_TABLE);
            buf.extend_from_slice(&meta.encode());
        }
        for (level, id) in &self.deleted {
            buf.push(TAG_DELETED_TABLE);
            buf.extend_from_slice(&level.to_le_bytes());
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<VersionEdit> {
        let mut edit = VersionEdit::default();
        let mut offset = 0usize;

        while offset < data.len() {
            let tag = data[offset];
            offset += 1;
            match tag {
                TAG_LOG_NUMBER => {
                    edit.log_number = Some(read_u64(data, &mut offset)?);
                }
                TAG_NEXT_FILE_NUMBER => {
                    edit.next_file_number = Some(read_u64(data, &mut offset)?);
                }
                TAG_LAST_SEQUENCE => {
                    edit.last_sequence = Some(read_u64(data, &mut offset)?);
                }
                TAG_ADDED_TABLE => {
                    let (meta, consumed) = SSTableMeta::decode(&data[offset..])?;
                    edit.added.push(meta);
                    offset += consumed;
                }
                TAG_DELETED_TABLE => {
                    if data.len() < offset + 12 {
                        return Err(Error::corruption("deleted table field truncated"));
                    }
                    let level = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
                    let id = u64::from_le_bytes(data[offset + 4..offset + 12].try_into().unwrap());
                    edit.deleted.push((level, id));
                    offset += 12;
                }
                other => {
                    return Err(Error::corruption(format!("unknown edit tag {other}")));
                }
            }
        }

        Ok(edit)
    }
}

fn read_u64(data: &[u8], offset: &mut usize) -> Result<u64> {
    if data.len() < *offset + 8 {
        return Err(Error::corruption("edit field truncated"));
    }
    let value = u64::from_le_bytes(data[*offset..*offset + 8].try_into().unwrap());
    *offset += 8;
    Ok(value)
}
