//! An opened history

use std::sync::Arc;

use crate::id::HistoryId;
use crate::reader::HistoryReader;
use crate::record::HistoryRecordStructure;
use crate::storage::RecordStorage;
use crate::writer::HistoryWriter;

/// One history with its reader and writer
///
/// Obtained from [`crate::HistoryService::create_history`]. The reader is
/// shared so listeners registered on it see every search.
#[derive(Debug)]
pub struct History {
    id: HistoryId,
    structure: HistoryRecordStructure,
    reader: HistoryReader,
    writer: HistoryWriter,
}

impl History {
    pub(crate) fn new(
        id: HistoryId,
        structure: HistoryRecordStructure,
        storage: Arc<dyn RecordStorage>,
    ) -> Self {
        Self {
            reader: HistoryReader::new(id.clone(), storage.clone()),
            writer: HistoryWriter::new(id.clone(), structure.clone(), storage),
            id,
            structure,
        }
    }

    pub fn id(&self) -> &HistoryId {
        &self.id
    }

    pub fn structure(&self) -> &HistoryRecordStructure {
        &self.structure
    }

    pub fn reader(&self) -> &HistoryReader {
        &self.reader
    }

    pub fn writer(&self) -> &HistoryWriter {
        &self.writer
    }
}
