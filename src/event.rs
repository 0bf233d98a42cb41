//! Parses `EVENT` push-notification bodies (§4.9, §6).
//!
//! These arrive unsolicited on stream id 0 ([`crate::stream_id::MAX_STREAM_ID`]
//! is for request/response traffic; 0 is reserved for exactly this). The
//! control connection ([`crate::topology`]) registers interest via `REGISTER`
//! at startup and folds these into the topology snapshot as they arrive.

use crate::buffer::BodyReader;
use crate::error::{Error, Result};
use crate::types::{SchemaChangeKind, SchemaChangeTarget, StatusChangeKind, TopologyChangeKind};
use bytes::Bytes;
use std::net::SocketAddr;

const EVENT_TOPOLOGY_CHANGE: &str = "TOPOLOGY_CHANGE";
const EVENT_STATUS_CHANGE: &str = "STATUS_CHANGE";
const EVENT_SCHEMA_CHANGE: &str = "SCHEMA_CHANGE";

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TopologyChange {
        kind: TopologyChangeKind,
        address: SocketAddr,
    },
    StatusChange {
        kind: StatusChangeKind,
        address: SocketAddr,
    },
    SchemaChange {
        kind: SchemaChangeKind,
        target: SchemaChangeTarget,
        keyspace: String,
    },
}

pub fn parse(body: Bytes) -> Result<Event> {
    let mut r = BodyReader::new(body);
    let event_type = r.read_string();

    let event = match event_type.as_str() {
        EVENT_TOPOLOGY_CHANGE => {
            let kind = r.read_topology_change_kind();
            let address = r.read_inet();
            Event::TopologyChange { kind, address }
        }
        EVENT_STATUS_CHANGE => {
            let kind = r.read_status_change_kind();
            let address = r.read_inet();
            Event::StatusChange { kind, address }
        }
        EVENT_SCHEMA_CHANGE => {
            let kind = r.read_schema_change_kind();
            let target = r.read_schema_change_target();
            let keyspace = r.read_string();
            // SCHEMA_CHANGE carries additional table/type/function/aggregate
            // fields depending on `target`; this core only routes topology
            // refreshes off the keyspace, so the rest is left unread and
            // discarded with the frame (§1 Non-goals).
            Event::SchemaChange {
                kind,
                target,
                keyspace,
            }
        }
        other => {
            return Err(Error::protocol(format!("unrecognized EVENT type {other:?}")));
        }
    };

    r.finish_with(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BodyWriter;

    #[test]
    fn parses_topology_change_new_node() {
        let mut w = BodyWriter::new();
        w.write_string(EVENT_TOPOLOGY_CHANGE);
        w.write_string("NEW_NODE");
        w.write_inet("10.0.0.5:9042".parse().unwrap());
        let parsed = parse(w.into_bytes().freeze()).unwrap();
        assert_eq!(
            parsed,
            Event::TopologyChange {
                kind: TopologyChangeKind::NewNode,
                address: "10.0.0.5:9042".parse().unwrap(),
            }
        );
    }

    #[test]
    fn parses_status_change_down() {
        let mut w = BodyWriter::new();
        w.write_string(EVENT_STATUS_CHANGE);
        w.write_string("DOWN");
        w.write_inet("10.0.0.6:9042".parse().unwrap());
        let parsed = parse(w.into_bytes().freeze()).unwrap();
        assert_eq!(
            parsed,
            Event::StatusChange {
                kind: StatusChangeKind::Down,
                address: "10.0.0.6:9042".parse().unwrap(),
            }
        );
    }

    #[test]
    fn parses_schema_change_keyspace() {
        let mut w = BodyWriter::new();
        w.write_string(EVENT_SCHEMA_CHANGE);
        w.write_string("CREATED");
        w.write_string("KEYSPACE");
        w.write_string("my_keyspace");
        let parsed = parse(w.into_bytes().freeze()).unwrap();
        assert_eq!(
            parsed,
            Event::SchemaChange {
                kind: SchemaChangeKind::Created,
                target: SchemaChangeTarget::Keyspace,
                keyspace: "my_keyspace".into(),
            }
        );
    }

    #[test]
    fn unrecognized_event_type_is_protocol_error() {
        let mut w = BodyWriter::new();
        w.write_string("NOT_A_REAL_EVENT");
        assert!(parse(w.into_bytes().freeze()).is_err());
    }
}
