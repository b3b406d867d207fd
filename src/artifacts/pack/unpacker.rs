//! Exploding small packs into loose objects
//!
//! Below the unpack limit it is cheaper to store each object loosely than
//! to keep the pack. Records are expanded in stream order; delta bases are
//! found either in the objects already stored (REF_DELTA) or through the
//! offsets seen so far (OFS_DELTA).

use crate::areas::database::Database;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::pack::PackError;
use crate::artifacts::pack::expander::Expander;
use crate::artifacts::pack::reader::{Reader, Record};
use std::collections::HashMap;
use std::io::Read;

pub struct Unpacker<'a, R: Read> {
    database: &'a Database,
    reader: Reader<R>,
    /// Pack offset -> stored OID, for resolving OFS_DELTA bases
    offset_map: HashMap<u64, ObjectId>,
}

impl<'a, R: Read> Unpacker<'a, R> {
    /// Takes a reader whose header has already been consumed
    pub fn new(database: &'a Database, reader: Reader<R>) -> Self {
        Unpacker {
            database,
            reader,
            offset_map: HashMap::new(),
        }
    }

    /// Store every object in the stream loosely; returns the object count
    pub fn process_pack(&mut self) -> anyhow::Result<u32> {
        let count = self.reader.count;

        for _ in 0..count {
            self.process_record()?;
        }
        self.reader.verify_trailer()?;

        Ok(count)
    }

    fn process_record(&mut self) -> anyhow::Result<()> {
        let (offset, record) = self.reader.read_record()?;

        let (object_type, data) = match record {
            Record::Simple { kind, data } => (ObjectType::from_pack_code(kind)?, data),
            Record::RefDelta { base_oid, delta } => {
                let base = self.database.load_raw(&base_oid)?;
                (base.object_type, Expander::expand(&base.data, &delta)?)
            }
            Record::OfsDelta { base_offset, delta } => {
                let base_oid = self.offset_map.get(&base_offset).ok_or_else(|| {
                    PackError::Corrupt(format!(
                        "ofs-delta base at {} not seen in this pack",
                        base_offset
                    ))
                })?;
                let base = self.database.load_raw(base_oid)?;
                (base.object_type, Expander::expand(&base.data, &delta)?)
            }
        };

        let oid = self.database.store_raw(object_type, &data)?;
        self.offset_map.insert(offset, oid);

        Ok(())
    }
}
