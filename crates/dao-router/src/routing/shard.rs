//! Table sharding strategies.
//!
//! A [`Shard`] maps one or more [`ShardKey`]s to the integer suffix of a
//! physical table. Strategies are immutable once built by [`parse_shards`].

use std::collections::HashMap;

use chrono::{Datelike, Local, TimeZone};

use crate::config::ShardConfig;
use crate::error::{DaoError, Result};

pub const MOD_SHARD_TYPE: &str = "mod";
pub const RANGE_SHARD_TYPE: &str = "range";
pub const DATE_DAY_SHARD_TYPE: &str = "date_day";
pub const DATE_MONTH_SHARD_TYPE: &str = "date_month";
pub const DATE_YEAR_SHARD_TYPE: &str = "date_year";

/// A value used to pick a shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardKey {
    Int(i64),
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
}

macro_rules! shard_key_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for ShardKey {
            fn from(v: $t) -> Self {
                ShardKey::Int(v as i64)
            }
        })*
    };
}

macro_rules! shard_key_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for ShardKey {
            fn from(v: $t) -> Self {
                ShardKey::UInt(v as u64)
            }
        })*
    };
}

shard_key_from_signed!(i8, i16, i32, i64, isize);
shard_key_from_unsigned!(u8, u16, u32, u64, usize);

impl From<&str> for ShardKey {
    fn from(v: &str) -> Self {
        ShardKey::Str(v.to_string())
    }
}

impl From<String> for ShardKey {
    fn from(v: String) -> Self {
        ShardKey::Str(v)
    }
}

impl From<&[u8]> for ShardKey {
    fn from(v: &[u8]) -> Self {
        ShardKey::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for ShardKey {
    fn from(v: Vec<u8>) -> Self {
        ShardKey::Bytes(v)
    }
}

/// Normalize a key for modulo sharding.
///
/// Integers pass through (signed values keep their two's complement bits),
/// decimal strings are parsed, anything else is hashed with CRC32.
pub fn mod_value(key: &ShardKey) -> u64 {
    match key {
        ShardKey::Int(v) => *v as u64,
        ShardKey::UInt(v) => *v,
        ShardKey::Str(s) => {
            parse_unsigned(s).unwrap_or_else(|| crc32fast::hash(s.as_bytes()) as u64)
        }
        ShardKey::Bytes(b) => crc32fast::hash(b) as u64,
    }
}

// A leading sign is not part of an unsigned decimal.
fn parse_unsigned(s: &str) -> Option<u64> {
    if s.starts_with('+') {
        return None;
    }
    s.parse().ok()
}

/// Normalize a key for range and date sharding.
///
/// # Panics
///
/// Panics if a string or byte key is not a signed base-10 integer. Such a
/// key means the caller or the configuration is wrong, and routing it
/// anywhere would misplace data.
pub fn num_value(key: &ShardKey) -> i64 {
    match key {
        ShardKey::Int(v) => *v,
        ShardKey::UInt(v) => *v as i64,
        ShardKey::Str(s) => parse_signed(s),
        ShardKey::Bytes(b) => parse_signed(&String::from_utf8_lossy(b)),
    }
}

fn parse_signed(s: &str) -> i64 {
    match s.parse() {
        Ok(v) => v,
        Err(e) => panic!("invalid num format {s:?}: {e}"),
    }
}

/// Concatenate independently normalized keys into one composite key.
fn composite_key<T: ToString>(keys: &[ShardKey], normalize: impl Fn(&ShardKey) -> T) -> ShardKey {
    ShardKey::Str(keys.iter().map(|k| normalize(k).to_string()).collect())
}

/// Closed integer interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumKeyRange {
    pub start: i64,
    pub end: i64,
}

impl NumKeyRange {
    pub fn contains(&self, v: i64) -> bool {
        self.start <= v && v <= self.end
    }
}

/// Split `[0, locations * table_row_limit)` into `locations` contiguous
/// ranges of `table_row_limit` keys each.
///
/// Returns an empty list when either argument is not positive or the total
/// key space overflows.
pub fn parse_num_sharding(locations: i64, table_row_limit: i64) -> Vec<NumKeyRange> {
    if locations <= 0 || table_row_limit <= 0 || locations.checked_mul(table_row_limit).is_none() {
        return Vec::new();
    }
    (0..locations)
        .map(|i| NumKeyRange {
            start: i * table_row_limit,
            end: (i + 1) * table_row_limit - 1,
        })
        .collect()
}

/// `key mod shard_num`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModShard {
    pub shard_num: u64,
}

impl ModShard {
    pub fn find_for_key(&self, keys: &[ShardKey]) -> Result<i64> {
        if self.shard_num == 0 {
            return Err(DaoError::MultiShard);
        }
        let m = match keys {
            [] => return Err(DaoError::KeyNotExist),
            [key] => mod_value(key),
            // Composite parts render as signed decimals before re-normalizing.
            _ => mod_value(&composite_key(keys, |k| mod_value(k) as i64)),
        };
        Ok((m % self.shard_num) as i64)
    }
}

/// Index of the first configured range containing the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumRangeShard {
    pub shards: Vec<NumKeyRange>,
}

impl NumRangeShard {
    /// # Panics
    ///
    /// Panics on keys that are not base-10 integers, see [`num_value`].
    pub fn find_for_key(&self, keys: &[ShardKey]) -> Result<i64> {
        if self.shards.is_empty() {
            return Err(DaoError::MultiShard);
        }
        let v = match keys {
            [] => return Err(DaoError::KeyNotExist),
            [key] => num_value(key),
            _ => num_value(&composite_key(keys, num_value)),
        };
        self.shards
            .iter()
            .position(|r| r.contains(v))
            .map(|i| i as i64)
            .ok_or(DaoError::KeyOutOfRange)
    }

    /// Whether `key` is exactly the first key of range `index`.
    pub fn equal_start(&self, key: &ShardKey, index: usize) -> Result<bool> {
        let range = self.shards.get(index).ok_or(DaoError::KeyOutOfRange)?;
        Ok(range.start == num_value(key))
    }

    /// Whether `key` is exactly the last key of range `index`.
    pub fn equal_stop(&self, key: &ShardKey, index: usize) -> Result<bool> {
        let range = self.shards.get(index).ok_or(DaoError::KeyOutOfRange)?;
        Ok(range.end == num_value(key))
    }
}

/// Calendar component a date strategy keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    Day,
}

/// Shards on the calendar date of the first key: `YYYY`, `YYYYMM` or
/// `YYYYMMDD`.
///
/// Keys are UNIX seconds, interpreted in the local timezone, or literal
/// `YYYY-MM-DD[ HH:MM:SS]` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateShard {
    pub part: DatePart,
}

impl DateShard {
    pub const DAY: DateShard = DateShard { part: DatePart::Day };
    pub const MONTH: DateShard = DateShard { part: DatePart::Month };
    pub const YEAR: DateShard = DateShard { part: DatePart::Year };

    /// # Panics
    ///
    /// Panics on a string key that is not a literal date long enough for
    /// the configured part.
    pub fn find_for_key(&self, keys: &[ShardKey]) -> Result<i64> {
        match keys.first() {
            Some(ShardKey::Int(secs)) => self.resolve_unix(*secs),
            Some(ShardKey::UInt(secs)) => self.resolve_unix(*secs as i64),
            Some(ShardKey::Str(s)) => Ok(self.resolve_literal(s)),
            Some(ShardKey::Bytes(_)) | None => Err(DaoError::KeyNotExist),
        }
    }

    fn resolve_unix(&self, secs: i64) -> Result<i64> {
        let tm = Local
            .timestamp_opt(secs, 0)
            .single()
            .ok_or(DaoError::KeyNotExist)?;
        let (y, m, d) = (tm.year() as i64, tm.month() as i64, tm.day() as i64);
        Ok(match self.part {
            DatePart::Year => y,
            DatePart::Month => y * 100 + m,
            DatePart::Day => y * 10_000 + m * 100 + d,
        })
    }

    fn resolve_literal(&self, s: &str) -> i64 {
        let (min_len, spans): (usize, &[(usize, usize)]) = match self.part {
            DatePart::Year => (4, &[(0, 4)]),
            DatePart::Month => (10, &[(0, 4), (5, 7)]),
            DatePart::Day => (10, &[(0, 4), (5, 7), (8, 10)]),
        };
        let bytes = s.as_bytes();
        if bytes.len() < min_len {
            panic!("invalid date format {s:?}");
        }
        spans
            .iter()
            .flat_map(|&(from, to)| &bytes[from..to])
            .try_fold(0i64, |acc, b| {
                b.is_ascii_digit().then(|| acc * 10 + (b - b'0') as i64)
            })
            .unwrap_or_else(|| panic!("invalid date format {s:?}"))
    }
}

/// A configured sharding strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shard {
    Mod(ModShard),
    NumRange(NumRangeShard),
    Date(DateShard),
}

impl Shard {
    pub fn find_for_key(&self, keys: &[ShardKey]) -> Result<i64> {
        match self {
            Shard::Mod(s) => s.find_for_key(keys),
            Shard::NumRange(s) => s.find_for_key(keys),
            Shard::Date(s) => s.find_for_key(keys),
        }
    }
}

/// Strategy tag of a [`ShardConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardKind {
    Mod,
    Range,
    DateDay,
    DateMonth,
    DateYear,
}

impl ShardKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            MOD_SHARD_TYPE => Some(Self::Mod),
            RANGE_SHARD_TYPE => Some(Self::Range),
            DATE_DAY_SHARD_TYPE => Some(Self::DateDay),
            DATE_MONTH_SHARD_TYPE => Some(Self::DateMonth),
            DATE_YEAR_SHARD_TYPE => Some(Self::DateYear),
            _ => None,
        }
    }
}

/// Logical `(db, table)` a strategy applies to.
pub type TableKey = (String, String);

/// Build one strategy per configuration row with a recognized type.
///
/// Rows with an unrecognized type are skipped. When several rows name the
/// same table the first one wins.
pub fn parse_shards(cfgs: &[ShardConfig]) -> Result<HashMap<TableKey, Shard>> {
    let mut shards = HashMap::with_capacity(cfgs.len());
    for cfg in cfgs {
        let invalid = |reason: &str| DaoError::InvalidShardConfig {
            db: cfg.db.clone(),
            table: cfg.table.clone(),
            reason: reason.to_string(),
        };
        let shard = match ShardKind::from_tag(&cfg.kind) {
            Some(ShardKind::Mod) => {
                if cfg.mod_num <= 0 {
                    return Err(invalid("mod_num must be > 0"));
                }
                Shard::Mod(ModShard {
                    shard_num: cfg.mod_num as u64,
                })
            }
            Some(ShardKind::Range) => {
                let ranges = parse_num_sharding(cfg.locations, cfg.table_row_limit);
                if ranges.is_empty() {
                    return Err(invalid(
                        "locations and table_row_limit must be > 0 and span a representable key space",
                    ));
                }
                Shard::NumRange(NumRangeShard { shards: ranges })
            }
            Some(ShardKind::DateDay) => Shard::Date(DateShard::DAY),
            Some(ShardKind::DateMonth) => Shard::Date(DateShard::MONTH),
            Some(ShardKind::DateYear) => Shard::Date(DateShard::YEAR),
            None => {
                tracing::warn!(
                    "skipping shard config for {}.{}: unknown type {:?}",
                    cfg.db,
                    cfg.table,
                    cfg.kind
                );
                continue;
            }
        };
        shards
            .entry((cfg.db.clone(), cfg.table.clone()))
            .or_insert(shard);
    }
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<K: Into<ShardKey>>(ks: impl IntoIterator<Item = K>) -> Vec<ShardKey> {
        ks.into_iter().map(Into::into).collect()
    }

    fn cfg(db: &str, table: &str, kind: &str) -> ShardConfig {
        ShardConfig {
            db: db.to_string(),
            table: table.to_string(),
            kind: kind.to_string(),
            ..ShardConfig::default()
        }
    }

    #[test]
    fn test_mod_shard() {
        let shard = ModShard { shard_num: 3 };
        assert_eq!(shard.find_for_key(&keys([5])).unwrap(), 2);
        assert_eq!(shard.find_for_key(&keys(["5"])).unwrap(), 2);
        assert_eq!(
            shard.find_for_key(&keys(["abc"])).unwrap(),
            (crc32fast::hash(b"abc") % 3) as i64
        );
        assert_eq!(
            shard.find_for_key(&[ShardKey::from(&b"abc"[..])]).unwrap(),
            (crc32fast::hash(b"abc") % 3) as i64
        );
    }

    #[test]
    fn test_mod_shard_signed_sign_prefix_hashes() {
        let shard = ModShard { shard_num: 1000 };
        assert_eq!(
            shard.find_for_key(&keys(["+5"])).unwrap(),
            (crc32fast::hash(b"+5") % 1000) as i64
        );
    }

    #[test]
    fn test_mod_shard_composite_key() {
        let shard = ModShard { shard_num: 1000 };
        // 12 and "34" concatenate to 1234.
        let k = vec![ShardKey::from(12), ShardKey::from("34")];
        assert_eq!(shard.find_for_key(&k).unwrap(), 234);

        // "ab" hashes first, then the decimal concatenation is re-parsed.
        let ab = crc32fast::hash(b"ab") as u64;
        let composite: u64 = format!("{ab}7").parse().unwrap();
        let k = vec![ShardKey::from("ab"), ShardKey::from(7u64)];
        assert_eq!(shard.find_for_key(&k).unwrap(), (composite % 1000) as i64);
    }

    #[test]
    fn test_mod_shard_requires_key() {
        let shard = ModShard { shard_num: 4 };
        assert!(matches!(shard.find_for_key(&[]), Err(DaoError::KeyNotExist)));
    }

    #[test]
    fn test_num_range_shard() {
        let shard = NumRangeShard {
            shards: vec![
                NumKeyRange { start: 0, end: 999 },
                NumKeyRange { start: 1000, end: 1999 },
            ],
        };
        assert_eq!(shard.find_for_key(&keys([500])).unwrap(), 0);
        assert_eq!(shard.find_for_key(&keys([1500])).unwrap(), 1);
        assert_eq!(shard.find_for_key(&keys(["1999"])).unwrap(), 1);
        assert!(matches!(
            shard.find_for_key(&keys([5000])),
            Err(DaoError::KeyOutOfRange)
        ));
        assert!(matches!(
            shard.find_for_key(&keys([-1])),
            Err(DaoError::KeyOutOfRange)
        ));
    }

    #[test]
    fn test_num_range_composite_key() {
        let shard = NumRangeShard {
            shards: parse_num_sharding(2, 1000),
        };
        // 1 and 5 concatenate to 15.
        assert_eq!(shard.find_for_key(&keys([1, 5])).unwrap(), 0);
        // 1 and 500 concatenate to 1500.
        assert_eq!(shard.find_for_key(&keys([1, 500])).unwrap(), 1);
    }

    #[test]
    fn test_num_range_empty_is_multi_shard() {
        let shard = NumRangeShard { shards: Vec::new() };
        assert!(matches!(
            shard.find_for_key(&keys([1])),
            Err(DaoError::MultiShard)
        ));
    }

    #[test]
    #[should_panic(expected = "invalid num format")]
    fn test_num_range_rejects_non_numeric() {
        let shard = NumRangeShard {
            shards: parse_num_sharding(2, 1000),
        };
        let _ = shard.find_for_key(&keys(["abc"]));
    }

    #[test]
    fn test_equal_start_stop() {
        let shard = NumRangeShard {
            shards: parse_num_sharding(3, 100),
        };
        assert!(shard.equal_start(&ShardKey::from(100), 1).unwrap());
        assert!(!shard.equal_start(&ShardKey::from(101), 1).unwrap());
        assert!(shard.equal_stop(&ShardKey::from("199"), 1).unwrap());
        assert!(shard.equal_stop(&ShardKey::from(5), 7).is_err());
    }

    #[test]
    fn test_parse_num_sharding() {
        let ranges = parse_num_sharding(3, 1000);
        assert_eq!(
            ranges,
            vec![
                NumKeyRange { start: 0, end: 999 },
                NumKeyRange { start: 1000, end: 1999 },
                NumKeyRange { start: 2000, end: 2999 },
            ]
        );
        assert!(parse_num_sharding(0, 1000).is_empty());
        assert!(parse_num_sharding(3, 0).is_empty());
        assert!(parse_num_sharding(i64::MAX, 2).is_empty());
    }

    #[test]
    fn test_date_shards_resolve_literal() {
        assert_eq!(
            DateShard::DAY.find_for_key(&keys(["2023-05-17"])).unwrap(),
            20230517
        );
        assert_eq!(
            DateShard::DAY
                .find_for_key(&keys(["2023-05-17 13:45:00"]))
                .unwrap(),
            20230517
        );
        assert_eq!(
            DateShard::MONTH.find_for_key(&keys(["2023-05-17"])).unwrap(),
            202305
        );
        assert_eq!(DateShard::YEAR.find_for_key(&keys(["2023"])).unwrap(), 2023);
    }

    #[test]
    fn test_date_shards_resolve_unix() {
        let midnight = Local
            .with_ymd_and_hms(2023, 5, 17, 0, 0, 0)
            .earliest()
            .unwrap()
            .timestamp();
        assert_eq!(DateShard::DAY.find_for_key(&keys([midnight])).unwrap(), 20230517);
        assert_eq!(
            DateShard::MONTH
                .find_for_key(&keys([midnight as u64]))
                .unwrap(),
            202305
        );
        assert_eq!(DateShard::YEAR.find_for_key(&keys([midnight])).unwrap(), 2023);
    }

    #[test]
    fn test_date_shard_key_types() {
        assert!(matches!(
            DateShard::DAY.find_for_key(&[]),
            Err(DaoError::KeyNotExist)
        ));
        assert!(matches!(
            DateShard::DAY.find_for_key(&[ShardKey::from(&b"2023-05-17"[..])]),
            Err(DaoError::KeyNotExist)
        ));
    }

    #[test]
    #[should_panic(expected = "invalid date format")]
    fn test_date_shard_rejects_short_literal() {
        let _ = DateShard::MONTH.find_for_key(&keys(["2023-05"]));
    }

    #[test]
    #[should_panic(expected = "invalid date format")]
    fn test_date_shard_rejects_non_digit_literal() {
        let _ = DateShard::DAY.find_for_key(&keys(["2023/05/xx"]));
    }

    #[test]
    fn test_parse_shards() {
        let mut m = cfg("mydb", "orders", "mod");
        m.mod_num = 4;
        let mut r = cfg("mydb", "logs", "range");
        r.locations = 2;
        r.table_row_limit = 1000;
        let d = cfg("mydb", "events", "date_day");
        let unknown = cfg("mydb", "users", "hash");

        let shards = parse_shards(&[unknown, m, r, d]).unwrap();
        assert_eq!(shards.len(), 3);
        assert_eq!(
            shards[&("mydb".to_string(), "orders".to_string())],
            Shard::Mod(ModShard { shard_num: 4 })
        );
        assert_eq!(
            shards[&("mydb".to_string(), "events".to_string())],
            Shard::Date(DateShard::DAY)
        );
        assert!(!shards.contains_key(&("mydb".to_string(), "users".to_string())));
    }

    #[test]
    fn test_parse_shards_first_row_wins() {
        let mut a = cfg("mydb", "orders", "mod");
        a.mod_num = 4;
        let mut b = cfg("mydb", "orders", "mod");
        b.mod_num = 8;
        let shards = parse_shards(&[a, b]).unwrap();
        assert_eq!(
            shards[&("mydb".to_string(), "orders".to_string())],
            Shard::Mod(ModShard { shard_num: 4 })
        );
    }

    #[test]
    fn test_parse_shards_rejects_bad_params() {
        let m = cfg("mydb", "orders", "mod");
        assert!(matches!(
            parse_shards(&[m]),
            Err(DaoError::InvalidShardConfig { .. })
        ));
        let r = cfg("mydb", "logs", "range");
        assert!(matches!(
            parse_shards(&[r]),
            Err(DaoError::InvalidShardConfig { .. })
        ));
    }
}
