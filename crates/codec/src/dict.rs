//! Four-namespace string-interning dictionary.
//!
//! Insertion-ordered unique entries per namespace; an `(ns, index)` pair
//! never refers to a different string once assigned. Transported alongside
//! the body as `dict.bin`.

use std::collections::HashMap;

use crate::error::{CodecError, Result};

/// Dictionary file magic.
pub const DICT_MAGIC: &[u8; 6] = b"RKDICT";
const DICT_VERSION: u8 = 0x01;
/// Magic + version + flags + 4 reserved bytes.
pub const DICT_HDR_SIZE: usize = 12;

/// The four disjoint interning namespaces, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Sessions,
    Branches,
    Emails,
    Paths,
}

impl Namespace {
    /// Wire order is fixed: sessions, branches, emails, paths.
    pub const ALL: [Self; 4] = [Self::Sessions, Self::Branches, Self::Emails, Self::Paths];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Sessions => "sessions",
            Self::Branches => "branches",
            Self::Emails => "emails",
            Self::Paths => "paths",
        }
    }

    const fn ordinal(self) -> usize {
        match self {
            Self::Sessions => 0,
            Self::Branches => 1,
            Self::Emails => 2,
            Self::Paths => 3,
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    entries: Vec<String>,
    index: HashMap<String, u64>,
}

/// Insertion-ordered string-interning table with four disjoint namespaces.
#[derive(Debug, Default)]
pub struct Dict {
    tables: [Table; 4],
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing index for `s` in `ns`, or assign the next one.
    pub fn lookup_or_add(&mut self, ns: Namespace, s: &str) -> u64 {
        let table = &mut self.tables[ns.ordinal()];
        if let Some(&idx) = table.index.get(s) {
            return idx;
        }
        let idx = table.entries.len() as u64;
        table.entries.push(s.to_owned());
        table.index.insert(s.to_owned(), idx);
        idx
    }

    /// Existing index for `s` in `ns`, if present.
    #[must_use]
    pub fn lookup(&self, ns: Namespace, s: &str) -> Option<u64> {
        self.tables[ns.ordinal()].index.get(s).copied()
    }

    /// Resolve an index back to its string.
    pub fn get(&self, ns: Namespace, index: u64) -> Result<&str> {
        self.tables[ns.ordinal()]
            .entries
            .get(index as usize)
            .map(String::as_str)
            .ok_or(CodecError::DictIndex {
                namespace: ns.as_str(),
                index,
            })
    }

    /// Entry count of one namespace.
    #[must_use]
    pub fn len(&self, ns: Namespace) -> usize {
        self.tables[ns.ordinal()].entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_entries() == 0
    }

    /// Entry count across all namespaces.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.tables.iter().map(|t| t.entries.len()).sum()
    }

    /// Serialize to the `dict.bin` wire layout.
    ///
    /// 12-byte header (magic, version, flags, reserved), then per namespace
    /// a u32-LE count and `count` entries of u16-LE length + UTF-8 bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(DICT_HDR_SIZE + 64 * self.total_entries());
        buf.extend_from_slice(DICT_MAGIC);
        buf.push(DICT_VERSION);
        buf.push(0x00); // flags, reserved
        buf.extend_from_slice(&[0u8; 4]); // reserved

        for ns in Namespace::ALL {
            let table = &self.tables[ns.ordinal()];
            buf.extend_from_slice(&(table.entries.len() as u32).to_le_bytes());
            for entry in &table.entries {
                let bytes = entry.as_bytes();
                if bytes.len() > u16::MAX as usize {
                    return Err(CodecError::EntryTooLong(bytes.len()));
                }
                buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                buf.extend_from_slice(bytes);
            }
        }
        Ok(buf)
    }

    /// Load a dictionary from its wire encoding.
    pub fn load(data: &[u8]) -> Result<Self> {
        if data.len() < DICT_HDR_SIZE {
            return Err(CodecError::Truncated("dict header".into()));
        }
        if &data[0..6] != DICT_MAGIC {
            return Err(CodecError::BadMagic(format!("{:02x?}", &data[0..6])));
        }

        let mut dict = Self::new();
        let mut pos = DICT_HDR_SIZE;

        for ns in Namespace::ALL {
            if pos + 4 > data.len() {
                return Err(CodecError::Truncated(format!("{} count", ns.as_str())));
            }
            let count = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            pos += 4;

            for _ in 0..count {
                if pos + 2 > data.len() {
                    return Err(CodecError::Truncated(format!("{} entry length", ns.as_str())));
                }
                let len = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
                pos += 2;
                if pos + len > data.len() {
                    return Err(CodecError::Truncated(format!("{} entry bytes", ns.as_str())));
                }
                let s = String::from_utf8_lossy(&data[pos..pos + len]).into_owned();
                pos += len;
                dict.lookup_or_add(ns, &s);
            }
        }

        Ok(dict)
    }
}
