//! Parses `RESULT` response bodies (§6).
//!
//! Row and column-type decoding are intentionally out of scope (§1 Non-goals:
//! "implementing every response body type of the wire protocol" and the core
//! excludes the user-facing query/iter API beyond the minimal façade in
//! [`crate::session`]). Where the data model calls for a "result-metadata
//! handle" (§3), this module keeps it as an opaque [`Bytes`] blob rather than
//! decoding CQL column types.

use crate::buffer::BodyReader;
use crate::error::{Error, Result};
use crate::types::{SchemaChangeKind, SchemaChangeTarget};
use bytes::Bytes;

const KIND_VOID: i32 = 0x0001;
const KIND_ROWS: i32 = 0x0002;
const KIND_SET_KEYSPACE: i32 = 0x0003;
const KIND_PREPARED: i32 = 0x0004;
const KIND_SCHEMA_CHANGE: i32 = 0x0005;

const ROWS_FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const PREPARED_FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;

#[derive(Debug)]
pub enum ResultBody {
    Void,
    Rows {
        paging_state: Option<Bytes>,
        /// Opaque: column specs + row contents, undecoded.
        raw: Bytes,
    },
    SetKeyspace(String),
    Prepared {
        id: Bytes,
        partition_key_indices: Vec<u16>,
        /// Opaque: global table spec + column specs for bound variables and
        /// result columns, undecoded (§3 "result-metadata handle").
        result_metadata: Bytes,
    },
    SchemaChange {
        kind: SchemaChangeKind,
        target: SchemaChangeTarget,
        keyspace: String,
        raw: Bytes,
    },
}

pub fn parse(body: Bytes) -> Result<ResultBody> {
    let mut r = BodyReader::new(body);
    let kind = r.read_int();

    let result = match kind {
        KIND_VOID => ResultBody::Void,
        KIND_ROWS => {
            let flags = r.read_int();
            let _columns_count = r.read_int();
            let paging_state = if flags & ROWS_FLAG_HAS_MORE_PAGES != 0 {
                r.read_bytes()
            } else {
                None
            };
            let raw = r.remaining_bytes();
            ResultBody::Rows { paging_state, raw }
        }
        KIND_SET_KEYSPACE => ResultBody::SetKeyspace(r.read_string()),
        KIND_PREPARED => {
            let id = r.read_bytes().unwrap_or_default();
            let flags = r.read_int();
            let _columns_count = r.read_int();
            let pk_count = r.read_int().max(0) as usize;
            let mut partition_key_indices = Vec::with_capacity(pk_count);
            for _ in 0..pk_count {
                partition_key_indices.push(r.read_short());
            }
            let _ = flags & PREPARED_FLAG_GLOBAL_TABLES_SPEC; // consumed opaquely below
            let result_metadata = r.remaining_bytes();
            ResultBody::Prepared {
                id,
                partition_key_indices,
                result_metadata,
            }
        }
        KIND_SCHEMA_CHANGE => {
            let kind = r.read_schema_change_kind();
            let target = r.read_schema_change_target();
            let keyspace = r.read_string();
            let raw = r.remaining_bytes();
            ResultBody::SchemaChange {
                kind,
                target,
                keyspace,
                raw,
            }
        }
        other => return Err(Error::protocol(format!("unrecognized RESULT kind {other}"))),
    };

    r.finish_with(result)
}
