//! Controller-number mapping table
//!
//! Parses the two-column `original,replacement` CSV into an immutable
//! lookup indexed by controller number. The string form never leaves this
//! module: the hot path only sees integer slots.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};

const SLOTS: usize = 128;

/// Immutable CC number translation table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingTable {
    slots: [Option<u8>; SLOTS],
    len: usize,
}

impl MappingTable {
    /// A table that maps nothing (every controller passes through)
    pub fn empty() -> Self {
        Self {
            slots: [None; SLOTS],
            len: 0,
        }
    }

    /// Build from already-parsed pairs.
    ///
    /// A key repeated with the same value is accepted; a key repeated with a
    /// different value is rejected rather than resolved by order.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        let mut table = Self::empty();
        for (index, (original, replacement)) in pairs.into_iter().enumerate() {
            table.insert(index as u64 + 1, original, replacement)?;
        }
        Ok(table)
    }

    /// Parse CSV text (no header row)
    pub fn from_csv_str(content: &str) -> Result<Self> {
        Self::from_reader(content.as_bytes())
    }

    /// Parse CSV from any reader (no header row)
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = Self::empty();
        let mut record = csv::StringRecord::new();
        loop {
            let more = reader.read_record(&mut record).map_err(|e| {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                Error::MalformedMapping {
                    line,
                    reason: e.to_string(),
                }
            })?;
            if !more {
                break;
            }

            let line = record.position().map(|p| p.line()).unwrap_or(0);
            if record.len() != 2 {
                return Err(Error::MalformedMapping {
                    line,
                    reason: format!("expected 2 fields, found {}", record.len()),
                });
            }

            let original = parse_field(&record[0], line)?;
            let replacement = parse_field(&record[1], line)?;
            table.insert(line, original, replacement)?;
        }

        Ok(table)
    }

    /// Read and parse a mapping file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let table = Self::from_reader(file)?;
        info!(
            "Loaded {} CC mappings from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    fn insert(&mut self, line: u64, original: i64, replacement: i64) -> Result<()> {
        let key = check_range(original, line)?;
        let value = check_range(replacement, line)?;

        match self.slots[key as usize] {
            Some(existing) if existing != value => Err(Error::MalformedMapping {
                line,
                reason: format!(
                    "controller {} already mapped to {}, cannot remap to {}",
                    key, existing, value
                ),
            }),
            Some(_) => {
                debug!("Duplicate mapping {} -> {} on line {}", key, value, line);
                Ok(())
            }
            None => {
                self.slots[key as usize] = Some(value);
                self.len += 1;
                Ok(())
            }
        }
    }

    /// Replacement for a controller number, if mapped
    #[inline]
    pub fn lookup(&self, original: u8) -> Option<u8> {
        self.slots.get(original as usize).copied().flatten()
    }

    /// Number of mapped controllers
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mapped pairs in ascending controller order
    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(k, v)| v.map(|v| (k as u8, v)))
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::empty()
    }
}

fn parse_field(field: &str, line: u64) -> Result<i64> {
    field.parse::<i64>().map_err(|_| Error::MalformedMapping {
        line,
        reason: format!("'{}' is not an integer", field),
    })
}

fn check_range(value: i64, line: u64) -> Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v < SLOTS as u8)
        .ok_or_else(|| Error::MalformedMapping {
            line,
            reason: format!("{} is outside 0-127", value),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_basic_mapping() {
        let table = MappingTable::from_csv_str("1,74\n2,71\n").unwrap();

        assert_eq!(table.lookup(1), Some(74));
        assert_eq!(table.lookup(2), Some(71));
        assert_eq!(table.lookup(5), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_whitespace_and_blank_lines() {
        let table = MappingTable::from_csv_str(" 7 , 11 \n\n10,91\r\n").unwrap();

        assert_eq!(table.lookup(7), Some(11));
        assert_eq!(table.lookup(10), Some(91));
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![(7, 11), (10, 91)]);
    }

    #[test]
    fn test_non_integer_reports_line() {
        let err = MappingTable::from_csv_str("1,74\nmod,71\n").unwrap_err();
        match err {
            Error::MalformedMapping { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("mod"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            MappingTable::from_csv_str("128,1"),
            Err(Error::MalformedMapping { line: 1, .. })
        ));
        assert!(matches!(
            MappingTable::from_csv_str("1,-1"),
            Err(Error::MalformedMapping { line: 1, .. })
        ));
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        assert!(matches!(
            MappingTable::from_csv_str("1,2,3"),
            Err(Error::MalformedMapping { .. })
        ));
        assert!(matches!(
            MappingTable::from_csv_str("1"),
            Err(Error::MalformedMapping { .. })
        ));
    }

    #[test]
    fn test_header_row_is_data() {
        assert!(MappingTable::from_csv_str("original,replacement\n1,2").is_err());
    }

    #[test]
    fn test_duplicate_keys() {
        let table = MappingTable::from_csv_str("1,74\n1,74").unwrap();
        assert_eq!(table.len(), 1);

        let err = MappingTable::from_csv_str("1,74\n1,75").unwrap_err();
        assert!(matches!(err, Error::MalformedMapping { line: 2, .. }));
    }

    #[test]
    fn test_from_pairs() {
        let table = MappingTable::from_pairs([(0, 127), (127, 0)]).unwrap();
        assert_eq!(table.lookup(0), Some(127));
        assert_eq!(table.lookup(127), Some(0));

        assert!(MappingTable::from_pairs([(3, 200)]).is_err());
    }

    #[test]
    fn test_lookup_out_of_range_is_none() {
        let table = MappingTable::from_pairs([(1, 2)]).unwrap();
        assert_eq!(table.lookup(200), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1,74").unwrap();
        writeln!(file, "2,71").unwrap();

        let table = MappingTable::load(file.path()).unwrap();
        assert_eq!(table.lookup(1), Some(74));

        assert!(matches!(
            MappingTable::load("/nonexistent/map.csv"),
            Err(Error::Io(_))
        ));
    }
}
