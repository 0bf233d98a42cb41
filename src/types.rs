//! Wire-level enumerations shared by the buffer (§4.1) and frame codec (§4.2).

use crate::error::{Error, Result};

/// 16-bit consistency level, values 0..10.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[repr(i16)]
pub enum Consistency {
    Any = 0x00,
    One = 0x01,
    Two = 0x02,
    Three = 0x03,
    Quorum = 0x04,
    All = 0x05,
    LocalQuorum = 0x06,
    EachQuorum = 0x07,
    Serial = 0x08,
    LocalSerial = 0x09,
    LocalOne = 0x0A,
}

impl Consistency {
    pub fn from_i16(value: i16) -> Result<Self> {
        Ok(match value {
            0x00 => Consistency::Any,
            0x01 => Consistency::One,
            0x02 => Consistency::Two,
            0x03 => Consistency::Three,
            0x04 => Consistency::Quorum,
            0x05 => Consistency::All,
            0x06 => Consistency::LocalQuorum,
            0x07 => Consistency::EachQuorum,
            0x08 => Consistency::Serial,
            0x09 => Consistency::LocalSerial,
            0x0A => Consistency::LocalOne,
            other => return Err(Error::InvalidConsistency(other)),
        })
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// The `write_type` field of a WRITE_TIMEOUT / WRITE_FAILURE error body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    BatchLog,
    Cas,
    View,
    Cdc,
}

impl WriteType {
    pub fn from_str(value: &str) -> Result<Self> {
        Ok(match value {
            "SIMPLE" => WriteType::Simple,
            "BATCH" => WriteType::Batch,
            "UNLOGGED_BATCH" => WriteType::UnloggedBatch,
            "COUNTER" => WriteType::Counter,
            "BATCH_LOG" => WriteType::BatchLog,
            "CAS" => WriteType::Cas,
            "VIEW" => WriteType::View,
            "CDC" => WriteType::Cdc,
            other => return Err(Error::protocol(format!("unknown write type '{other}'"))),
        })
    }
}

/// `TOPOLOGY_CHANGE` event kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopologyChangeKind {
    NewNode,
    RemovedNode,
    MovedNode,
}

impl TopologyChangeKind {
    pub fn from_str(value: &str) -> Result<Self> {
        Ok(match value {
            "NEW_NODE" => TopologyChangeKind::NewNode,
            "REMOVED_NODE" => TopologyChangeKind::RemovedNode,
            "MOVED_NODE" => TopologyChangeKind::MovedNode,
            other => {
                return Err(Error::InvalidEventType(format!(
                    "unknown topology change kind '{other}'"
                )))
            }
        })
    }
}

/// `STATUS_CHANGE` event kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusChangeKind {
    Up,
    Down,
}

impl StatusChangeKind {
    pub fn from_str(value: &str) -> Result<Self> {
        Ok(match value {
            "UP" => StatusChangeKind::Up,
            "DOWN" => StatusChangeKind::Down,
            other => {
                return Err(Error::InvalidEventType(format!(
                    "unknown status change kind '{other}'"
                )))
            }
        })
    }
}

/// `SCHEMA_CHANGE` event kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaChangeKind {
    Created,
    Updated,
    Dropped,
}

impl SchemaChangeKind {
    pub fn from_str(value: &str) -> Result<Self> {
        Ok(match value {
            "CREATED" => SchemaChangeKind::Created,
            "UPDATED" => SchemaChangeKind::Updated,
            "DROPPED" => SchemaChangeKind::Dropped,
            other => {
                return Err(Error::InvalidEventType(format!(
                    "unknown schema change kind '{other}'"
                )))
            }
        })
    }
}

/// `SCHEMA_CHANGE` target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaChangeTarget {
    Keyspace,
    Table,
    UserType,
    Function,
    Aggregate,
}

impl SchemaChangeTarget {
    pub fn from_str(value: &str) -> Result<Self> {
        Ok(match value {
            "KEYSPACE" => SchemaChangeTarget::Keyspace,
            "TABLE" => SchemaChangeTarget::Table,
            "TYPE" => SchemaChangeTarget::UserType,
            "FUNCTION" => SchemaChangeTarget::Function,
            "AGGREGATE" => SchemaChangeTarget::Aggregate,
            other => {
                return Err(Error::InvalidEventType(format!(
                    "unknown schema change target '{other}'"
                )))
            }
        })
    }
}

/// A parsed IPv4 or IPv6 socket address, as carried by the `[inet]` wire type.
pub type Inet = std::net::SocketAddr;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_round_trips_0_to_10() {
        for raw in 0..=10i16 {
            let c = Consistency::from_i16(raw).unwrap();
            assert_eq!(c.as_i16(), raw);
        }
    }

    #[test]
    fn consistency_rejects_above_10() {
        assert!(matches!(
            Consistency::from_i16(11),
            Err(Error::InvalidConsistency(11))
        ));
    }

    #[test]
    fn write_type_rejects_unknown() {
        assert!(WriteType::from_str("NOT_A_TYPE").is_err());
    }
}
