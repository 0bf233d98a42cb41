//! Typed, big-endian primitives over the wire (§4.1).
//!
//! Encoding never fails: [`BodyWriter`] just appends bytes. Decoding can fail
//! on a short read or an illegal value, and [`BodyReader`] latches the first
//! such failure into a sticky error slot — every typed read after that becomes
//! a no-op returning the zero value, so a parser can chain reads and check the
//! error exactly once at the end via [`BodyReader::finish`].

use crate::error::{Error, Result};
use crate::types::{
    Consistency, Inet, SchemaChangeKind, SchemaChangeTarget, StatusChangeKind, TopologyChangeKind,
    WriteType,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Accumulates bytes for an outgoing frame body.
#[derive(Default)]
pub struct BodyWriter {
    buf: BytesMut,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_byte(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_short(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_int(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_long(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// `[string]`: short-length-prefixed UTF-8, length must fit in a u16.
    pub fn write_string(&mut self, value: &str) {
        debug_assert!(value.len() <= u16::MAX as usize);
        self.write_short(value.len() as u16);
        self.buf.put_slice(value.as_bytes());
    }

    /// `[bytes]`: int-length-prefixed; `None` is encoded as length -1.
    pub fn write_bytes(&mut self, value: Option<&[u8]>) {
        match value {
            None => self.write_int(-1),
            Some(bytes) => {
                self.write_int(bytes.len() as i32);
                self.buf.put_slice(bytes);
            }
        }
    }

    pub fn write_string_list(&mut self, values: &[impl AsRef<str>]) {
        self.write_short(values.len() as u16);
        for value in values {
            self.write_string(value.as_ref());
        }
    }

    pub fn write_string_map(&mut self, values: &[(impl AsRef<str>, impl AsRef<str>)]) {
        self.write_short(values.len() as u16);
        for (k, v) in values {
            self.write_string(k.as_ref());
            self.write_string(v.as_ref());
        }
    }

    pub fn write_string_multimap(&mut self, values: &[(impl AsRef<str>, Vec<impl AsRef<str>>)]) {
        self.write_short(values.len() as u16);
        for (k, vs) in values {
            self.write_string(k.as_ref());
            self.write_string_list(vs);
        }
    }

    pub fn write_consistency(&mut self, value: Consistency) {
        self.write_short(value.as_i16() as u16);
    }

    pub fn write_inet(&mut self, addr: SocketAddr) {
        match addr.ip() {
            IpAddr::V4(v4) => {
                self.write_byte(4);
                self.buf.put_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                self.write_byte(16);
                self.buf.put_slice(&v6.octets());
            }
        }
        self.write_int(addr.port() as i32);
    }

    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Consumes bytes from a decoded frame body. See module docs for the sticky
/// error protocol.
pub struct BodyReader {
    buf: Bytes,
    err: Option<Error>,
}

impl BodyReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, err: None }
    }

    /// Latch `err` if no error is latched yet. Returns `true` if the reader
    /// was already poisoned (so the caller should skip the operation).
    fn poisoned(&mut self) -> bool {
        self.err.is_some()
    }

    fn fail(&mut self, err: Error) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    fn need(&mut self, n: usize) -> bool {
        if self.poisoned() {
            return false;
        }
        if self.buf.remaining() < n {
            self.fail(Error::protocol(format!(
                "short read: need {n} bytes, have {}",
                self.buf.remaining()
            )));
            return false;
        }
        true
    }

    pub fn read_byte(&mut self) -> u8 {
        if !self.need(1) {
            return 0;
        }
        self.buf.get_u8()
    }

    pub fn read_short(&mut self) -> u16 {
        if !self.need(2) {
            return 0;
        }
        self.buf.get_u16()
    }

    pub fn read_int(&mut self) -> i32 {
        if !self.need(4) {
            return 0;
        }
        self.buf.get_i32()
    }

    pub fn read_long(&mut self) -> i64 {
        if !self.need(8) {
            return 0;
        }
        self.buf.get_i64()
    }

    /// `[string]`
    pub fn read_string(&mut self) -> String {
        let len = self.read_short() as usize;
        if self.poisoned() || !self.need(len) {
            return String::new();
        }
        let raw = self.buf.split_to(len);
        match String::from_utf8(raw.to_vec()) {
            Ok(s) => s,
            Err(e) => {
                self.fail(Error::protocol(format!("invalid UTF-8 in [string]: {e}")));
                String::new()
            }
        }
    }

    /// `[bytes]`: length -1 decodes to `None`.
    pub fn read_bytes(&mut self) -> Option<Bytes> {
        let len = self.read_int();
        if self.poisoned() {
            return None;
        }
        if len < 0 {
            return None;
        }
        let len = len as usize;
        if !self.need(len) {
            return None;
        }
        Some(self.buf.split_to(len))
    }

    pub fn read_string_list(&mut self) -> Vec<String> {
        let n = self.read_short() as usize;
        let mut out = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            if self.poisoned() {
                break;
            }
            out.push(self.read_string());
        }
        out
    }

    pub fn read_string_map(&mut self) -> HashMap<String, String> {
        let n = self.read_short() as usize;
        let mut out = HashMap::with_capacity(n);
        for _ in 0..n {
            if self.poisoned() {
                break;
            }
            let k = self.read_string();
            let v = self.read_string();
            out.insert(k, v);
        }
        out
    }

    pub fn read_string_multimap(&mut self) -> HashMap<String, Vec<String>> {
        let n = self.read_short() as usize;
        let mut out = HashMap::with_capacity(n);
        for _ in 0..n {
            if self.poisoned() {
                break;
            }
            let k = self.read_string();
            let v = self.read_string_list();
            out.insert(k, v);
        }
        out
    }

    pub fn read_consistency(&mut self) -> Consistency {
        let raw = self.read_short() as i16;
        if self.poisoned() {
            return Consistency::Any;
        }
        match Consistency::from_i16(raw) {
            Ok(c) => c,
            Err(e) => {
                self.fail(e);
                Consistency::Any
            }
        }
    }

    pub fn read_write_type(&mut self) -> WriteType {
        let raw = self.read_string();
        if self.poisoned() {
            return WriteType::Simple;
        }
        match WriteType::from_str(&raw) {
            Ok(w) => w,
            Err(e) => {
                self.fail(e);
                WriteType::Simple
            }
        }
    }

    pub fn read_topology_change_kind(&mut self) -> TopologyChangeKind {
        let raw = self.read_string();
        if self.poisoned() {
            return TopologyChangeKind::NewNode;
        }
        match TopologyChangeKind::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                self.fail(e);
                TopologyChangeKind::NewNode
            }
        }
    }

    pub fn read_status_change_kind(&mut self) -> StatusChangeKind {
        let raw = self.read_string();
        if self.poisoned() {
            return StatusChangeKind::Up;
        }
        match StatusChangeKind::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                self.fail(e);
                StatusChangeKind::Up
            }
        }
    }

    pub fn read_schema_change_kind(&mut self) -> SchemaChangeKind {
        let raw = self.read_string();
        if self.poisoned() {
            return SchemaChangeKind::Updated;
        }
        match SchemaChangeKind::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                self.fail(e);
                SchemaChangeKind::Updated
            }
        }
    }

    pub fn read_schema_change_target(&mut self) -> SchemaChangeTarget {
        let raw = self.read_string();
        if self.poisoned() {
            return SchemaChangeTarget::Keyspace;
        }
        match SchemaChangeTarget::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                self.fail(e);
                SchemaChangeTarget::Keyspace
            }
        }
    }

    pub fn read_inet(&mut self) -> Inet {
        let len = self.read_byte();
        if self.poisoned() {
            return SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        }
        let ip = match len {
            4 => {
                if !self.need(4) {
                    return SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
                }
                let raw = self.buf.split_to(4);
                IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
            }
            16 => {
                if !self.need(16) {
                    return SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
                }
                let raw = self.buf.split_to(16);
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&raw);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                self.fail(Error::protocol(format!("invalid [inet] address length {other}")));
                return SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
            }
        };
        let port = self.read_int();
        if self.poisoned() {
            return SocketAddr::new(ip, 0);
        }
        SocketAddr::new(ip, port as u16)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Consumes and returns whatever is left, as an opaque blob. Used where a
    /// parser intentionally stops short of a fully-typed decode (e.g. the
    /// trailing column specs of a RESULT body, which this driver treats as an
    /// opaque "result-metadata handle" rather than modeling CQL type encoding).
    pub fn remaining_bytes(&mut self) -> Bytes {
        if self.poisoned() {
            return Bytes::new();
        }
        self.buf.copy_to_bytes(self.buf.remaining())
    }

    /// Checks the sticky error slot exactly once. Call at the end of a parser.
    pub fn finish(mut self) -> Result<()> {
        self.err.take().map_or(Ok(()), Err)
    }

    /// Like [`finish`](Self::finish) but also returns a value computed by the caller.
    pub fn finish_with<T>(mut self, value: T) -> Result<T> {
        match self.err.take() {
            Some(e) => Err(e),
            None => Ok(value),
        }
    }
}
