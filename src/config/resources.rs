// ABOUTME: Resource quantities: memory sizes and CPU limits.
// ABOUTME: Parses "512m", "2g", "1.5" and renders them for engines and units.

use serde::de::{self, Deserialize, Deserializer};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// A size in bytes, written as `<n>[k|m|g]` (binary units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn bytes(n: u64) -> Self {
        Self(n)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * MIB)
    }

    pub const fn gib(n: u64) -> Self {
        Self(n * GIB)
    }

    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let lower = lower.strip_suffix('b').unwrap_or(&lower);
        let (digits, multiplier) = match lower.chars().last() {
            Some('g') => (&lower[..lower.len() - 1], GIB),
            Some('m') => (&lower[..lower.len() - 1], MIB),
            Some('k') => (&lower[..lower.len() - 1], KIB),
            _ => (lower, 1),
        };

        let n = digits
            .parse::<u64>()
            .map_err(|_| format!("invalid size: {}", s))?;
        n.checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| format!("size out of range: {}", s))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            n if n >= GIB && n % GIB == 0 => write!(f, "{}g", n / GIB),
            n if n >= MIB && n % MIB == 0 => write!(f, "{}m", n / MIB),
            n if n >= KIB && n % KIB == 0 => write!(f, "{}k", n / KIB),
            n => write!(f, "{}", n),
        }
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = super::layer::ScalarString::deserialize(deserializer)?;
        raw.0.parse().map_err(de::Error::custom)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// CPU allowance in cores (`1.5` = one and a half cores).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct CpuLimit(f64);

impl CpuLimit {
    pub fn cores(&self) -> f64 {
        self.0
    }

    /// Value for the engine's `NanoCpus` field.
    pub fn nano_cpus(&self) -> i64 {
        (self.0 * 1_000_000_000.0) as i64
    }

    /// Value for a systemd `CPUQuota=` directive.
    pub fn systemd_quota(&self) -> String {
        format!("{}%", (self.0 * 100.0).round() as u64)
    }
}

impl FromStr for CpuLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cores = s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid cpu limit: {}", s))?;
        if !cores.is_finite() || cores <= 0.0 {
            return Err(format!("cpu limit must be positive: {}", s));
        }
        Ok(CpuLimit(cores))
    }
}

impl fmt::Display for CpuLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for CpuLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = super::layer::ScalarString::deserialize(deserializer)?;
        raw.0.parse().map_err(de::Error::custom)
    }
}

impl Serialize for CpuLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

/// Per-service resource limits applied by both strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceLimits {
    pub memory: Option<ByteSize>,
    pub cpus: Option<CpuLimit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_units() {
        assert_eq!("512m".parse::<ByteSize>().unwrap(), ByteSize::mib(512));
        assert_eq!("2G".parse::<ByteSize>().unwrap(), ByteSize::gib(2));
        assert_eq!("64kb".parse::<ByteSize>().unwrap(), ByteSize::bytes(64 * 1024));
        assert_eq!("4096".parse::<ByteSize>().unwrap(), ByteSize::bytes(4096));
        assert!("lots".parse::<ByteSize>().is_err());
        assert!("-1m".parse::<ByteSize>().is_err());
    }

    #[test]
    fn displays_largest_exact_unit() {
        assert_eq!(ByteSize::gib(2).to_string(), "2g");
        assert_eq!(ByteSize::mib(1536).to_string(), "1536m");
        assert_eq!(ByteSize::bytes(1000).to_string(), "1000");
    }

    #[test]
    fn cpu_limit_conversions() {
        let cpu: CpuLimit = "1.5".parse().unwrap();
        assert_eq!(cpu.nano_cpus(), 1_500_000_000);
        assert_eq!(cpu.systemd_quota(), "150%");
        assert!("0".parse::<CpuLimit>().is_err());
        assert!("-2".parse::<CpuLimit>().is_err());
        assert!("NaN".parse::<CpuLimit>().is_err());
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let cpu: CpuLimit = serde_yaml::from_str("2").unwrap();
        assert_eq!(cpu.cores(), 2.0);
        let mem: ByteSize = serde_yaml::from_str("\"1g\"").unwrap();
        assert_eq!(mem, ByteSize::gib(1));
    }
}
