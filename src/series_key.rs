//! Series keys
//!
//! A `SeriesKey` names one logical time series: a kline stream, or the output
//! of an indicator/operation computed on top of one. Keys are used as map keys
//! in the registry and travel over the wire as their canonical string:
//!
//! ```text
//! kline|BINANCE|BTCUSDT|1m
//! indicator|BINANCE|BTCUSDT|1m|MA|period=20
//! operation|BINANCE|BTCUSDT|1m|SPREAD|left=a,right=b
//! ```
//!
//! Params are kept sorted so two keys for the same tuple always encode to the
//! same string.

use crate::error::KeyError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const FIELD_SEP: char = '|';
const PARAM_SEP: char = ',';
const PARAM_EQ: char = '=';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeriesKind {
    Kline,
    Indicator,
    Operation,
}

impl SeriesKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kline => "kline",
            Self::Indicator => "indicator",
            Self::Operation => "operation",
        }
    }

    fn field_count(&self) -> usize {
        match self {
            Self::Kline => 4,
            Self::Indicator | Self::Operation => 6,
        }
    }
}

impl FromStr for SeriesKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kline" => Ok(Self::Kline),
            "indicator" => Ok(Self::Indicator),
            "operation" => Ok(Self::Operation),
            other => Err(KeyError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl IntervalUnit {
    fn suffix(&self) -> char {
        match self {
            Self::Second => 's',
            Self::Minute => 'm',
            Self::Hour => 'h',
            Self::Day => 'd',
            Self::Week => 'w',
        }
    }

    fn seconds(&self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 604_800,
        }
    }
}

/// Bar interval such as `1m`, `4h` or `1d`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    pub count: u32,
    pub unit: IntervalUnit,
}

impl Interval {
    pub fn as_seconds(&self) -> i64 {
        self.count as i64 * self.unit.seconds()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Interval {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KeyError::InvalidInterval(s.to_string());
        let suffix = s.chars().last().ok_or_else(invalid)?;
        let unit = match suffix {
            's' => IntervalUnit::Second,
            'm' => IntervalUnit::Minute,
            'h' => IntervalUnit::Hour,
            'd' => IntervalUnit::Day,
            'w' => IntervalUnit::Week,
            _ => return Err(invalid()),
        };
        let digits = &s[..s.len() - suffix.len_utf8()];
        // Reject "+5m" and friends so the canonical form stays unique.
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let count: u32 = digits.parse().map_err(|_| invalid())?;
        if count == 0 || digits.starts_with('0') {
            return Err(invalid());
        }
        Ok(Self { count, unit })
    }
}

/// Canonical identifier of one logical time series.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    kind: SeriesKind,
    exchange: String,
    symbol: String,
    interval: Interval,
    name: Option<String>,
    params: BTreeMap<String, String>,
}

fn check_component(value: &str, field: &'static str) -> Result<(), KeyError> {
    if value.is_empty() {
        return Err(KeyError::EmptyComponent(field));
    }
    if value.contains([FIELD_SEP, PARAM_SEP, PARAM_EQ]) {
        return Err(KeyError::ReservedCharacter(value.to_string()));
    }
    Ok(())
}

impl SeriesKey {
    pub fn kline(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        interval: Interval,
    ) -> Result<Self, KeyError> {
        let exchange = exchange.into();
        let symbol = symbol.into();
        check_component(&exchange, "exchange")?;
        check_component(&symbol, "symbol")?;
        Ok(Self {
            kind: SeriesKind::Kline,
            exchange,
            symbol,
            interval,
            name: None,
            params: BTreeMap::new(),
        })
    }

    /// Builds an indicator or operation key on the same market as `self`.
    pub fn derive<K, V>(
        &self,
        kind: SeriesKind,
        name: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, KeyError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        if kind == SeriesKind::Kline {
            return Err(KeyError::UnknownKind(kind.as_str().to_string()));
        }
        let name = name.into();
        check_component(&name, "name")?;
        let mut map = BTreeMap::new();
        for (k, v) in params {
            let (k, v) = (k.into(), v.into());
            check_component(&k, "param name")?;
            check_component(&v, "param value")?;
            if map.insert(k.clone(), v).is_some() {
                return Err(KeyError::DuplicateParam(k));
            }
        }
        Ok(Self {
            kind,
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            interval: self.interval,
            name: Some(name),
            params: map,
        })
    }

    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Indicator/operation name; `None` for klines.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn is_base(&self) -> bool {
        self.kind == SeriesKind::Kline
    }

    /// Same exchange, symbol and interval.
    pub fn same_market(&self, other: &SeriesKey) -> bool {
        self.exchange == other.exchange
            && self.symbol == other.symbol
            && self.interval == other.interval
    }

    /// True for a derived key that can be attached to the base key `base`.
    pub fn is_companion_of(&self, base: &SeriesKey) -> bool {
        !self.is_base() && base.is_base() && self.same_market(base)
    }

    /// The same indicator/operation computed on `base`'s market. `None` for
    /// klines or when `base` is not a kline.
    pub fn rebased(&self, base: &SeriesKey) -> Option<SeriesKey> {
        if self.is_base() || !base.is_base() {
            return None;
        }
        Some(Self {
            exchange: base.exchange.clone(),
            symbol: base.symbol.clone(),
            interval: base.interval,
            ..self.clone()
        })
    }

    /// Short human label, used by the legend.
    pub fn label(&self) -> String {
        match &self.name {
            None => format!("{} {}", self.symbol, self.interval),
            Some(name) if self.params.is_empty() => name.clone(),
            Some(name) => {
                let args: Vec<&str> = self.params.values().map(String::as_str).collect();
                format!("{}({})", name, args.join(","))
            }
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn decode(s: &str) -> Result<Self, KeyError> {
        s.parse()
    }
}

/// Keys from `candidates` that are valid companions of `base`.
pub fn companions_of<'a, I>(base: &'a SeriesKey, candidates: I) -> impl Iterator<Item = &'a SeriesKey> + 'a
where
    I: IntoIterator<Item = &'a SeriesKey>,
    I::IntoIter: 'a,
{
    candidates.into_iter().filter(move |k| k.is_companion_of(base))
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.kind.as_str(),
            self.exchange,
            self.symbol,
            self.interval,
            sep = FIELD_SEP
        )?;
        if let Some(name) = &self.name {
            write!(f, "{}{}{}", FIELD_SEP, name, FIELD_SEP)?;
            for (i, (k, v)) in self.params.iter().enumerate() {
                if i > 0 {
                    write!(f, "{}", PARAM_SEP)?;
                }
                write!(f, "{}{}{}", k, PARAM_EQ, v)?;
            }
        }
        Ok(())
    }
}

impl FromStr for SeriesKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        let fields: Vec<&str> = s.split(FIELD_SEP).collect();
        let kind: SeriesKind = fields[0].parse()?;
        if fields.len() != kind.field_count() {
            return Err(KeyError::FieldCount {
                key: s.to_string(),
                expected: kind.field_count(),
                found: fields.len(),
            });
        }

        let interval: Interval = fields[3].parse()?;
        let base = SeriesKey::kline(fields[1], fields[2], interval)?;
        if kind == SeriesKind::Kline {
            return Ok(base);
        }

        let mut params = Vec::new();
        if !fields[5].is_empty() {
            for pair in fields[5].split(PARAM_SEP) {
                let (k, v) = pair
                    .split_once(PARAM_EQ)
                    .ok_or_else(|| KeyError::MalformedParam(pair.to_string()))?;
                params.push((k, v));
            }
        }
        let key = base.derive(kind, fields[4], params)?;

        // Params written out of order decode fine but are not canonical.
        if key.to_string() != s {
            tracing::debug!("non-canonical series key `{}` normalised to `{}`", s, key);
        }
        Ok(key)
    }
}

impl Serialize for SeriesKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SeriesKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_rejects_non_canonical_forms() {
        assert!("01m".parse::<Interval>().is_err());
        assert!("0m".parse::<Interval>().is_err());
        assert!("+5m".parse::<Interval>().is_err());
        assert!("m".parse::<Interval>().is_err());
        assert_eq!("4h".parse::<Interval>().unwrap().as_seconds(), 14_400);
    }

    #[test]
    fn params_are_encoded_sorted() {
        let base = SeriesKey::kline("BINANCE", "BTCUSDT", "1m".parse().unwrap()).unwrap();
        let key = base
            .derive(SeriesKind::Indicator, "BOLL", [("std", "2"), ("period", "20")])
            .unwrap();
        assert_eq!(
            key.to_string(),
            "indicator|BINANCE|BTCUSDT|1m|BOLL|period=20,std=2"
        );
    }

    fn round_trip(text: &str) -> SeriesKey {
        let key = SeriesKey::decode(text).unwrap();
        assert_eq!(SeriesKey::decode(&key.encode()).unwrap(), key);
        key
    }

    #[test]
    fn keys_survive_encode_and_decode() {
        let kline = round_trip("kline|BINANCE|BTCUSDT|1m");
        assert!(kline.is_base());
        assert_eq!(kline.encode(), "kline|BINANCE|BTCUSDT|1m");

        let ma = round_trip("indicator|BINANCE|BTCUSDT|1m|MA|period=20");
        assert_eq!(ma.name(), Some("MA"));
        assert_eq!(ma.params()["period"], "20");

        let spread = round_trip("operation|OKX|ETHUSDT|4h|SPREAD|");
        assert_eq!(spread.kind(), SeriesKind::Operation);
        assert!(spread.params().is_empty());
        assert_eq!(spread.encode(), "operation|OKX|ETHUSDT|4h|SPREAD|");

        // Out of order params decode to the canonical key
        let boll = round_trip("indicator|BINANCE|BTCUSDT|1m|BOLL|std=2,period=20");
        assert_eq!(boll.encode(), "indicator|BINANCE|BTCUSDT|1m|BOLL|period=20,std=2");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert_eq!(SeriesKey::decode(""), Err(KeyError::Empty));
        assert_eq!(
            SeriesKey::decode("bar|BINANCE|BTCUSDT|1m"),
            Err(KeyError::UnknownKind("bar".to_string()))
        );
        assert_eq!(
            SeriesKey::decode("indicator|BINANCE|BTCUSDT|1m|MA"),
            Err(KeyError::FieldCount {
                key: "indicator|BINANCE|BTCUSDT|1m|MA".to_string(),
                expected: 6,
                found: 5,
            })
        );
        assert_eq!(
            SeriesKey::decode("kline||BTCUSDT|1m"),
            Err(KeyError::EmptyComponent("exchange"))
        );
        assert_eq!(
            SeriesKey::decode("kline|BIN,ANCE|BTCUSDT|1m"),
            Err(KeyError::ReservedCharacter("BIN,ANCE".to_string()))
        );
        assert_eq!(
            SeriesKey::decode("indicator|BINANCE|BTCUSDT|1m|MA|period"),
            Err(KeyError::MalformedParam("period".to_string()))
        );
        assert_eq!(
            SeriesKey::decode("indicator|BINANCE|BTCUSDT|1m|MA|period=1,period=2"),
            Err(KeyError::DuplicateParam("period".to_string()))
        );
        assert_eq!(
            SeriesKey::decode("kline|BINANCE|BTCUSDT|0m"),
            Err(KeyError::InvalidInterval("0m".to_string()))
        );
    }
}
