//! Resource quantity parsing and vector arithmetic
//!
//! Quantities use the Kubernetes grammar (`100m`, `0.5`, `1536Mi`, `2G`, …)
//! and are normalised to integer units: millicores for CPU, bytes for
//! memory, a plain count for pods. Fractional results always round up so a
//! partition is never sized below its demand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use thiserror::Error;

/// Resource dimension a quantity is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Pods,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Cpu, Resource::Memory, Resource::Pods];
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cpu => write!(f, "cpu"),
            Resource::Memory => write!(f, "memory"),
            Resource::Pods => write!(f, "pods"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("malformed quantity {0:?}")]
    Malformed(String),
    #[error("unknown unit suffix in quantity {0:?}")]
    UnknownSuffix(String),
    #[error("{resource} quantity {input:?} must be a plain integer")]
    IntegerRequired { input: String, resource: Resource },
    #[error("quantity {0:?} does not fit the {1} unit range")]
    Overflow(String, Resource),
}

/// Decimal and binary SI factors, as (numerator, denominator).
fn suffix_factor(suffix: &str) -> Option<(u128, u128)> {
    Some(match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" | "K" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return None,
    })
}

fn div_ceil_u128(numerator: u128, denominator: u128) -> u128 {
    numerator / denominator + u128::from(numerator % denominator != 0)
}

/// Parses a quantity string into the internal unit of the given dimension.
///
/// CPU values are returned in millicores (`"2"` → 2000, `"100m"` → 100),
/// memory in bytes, pods as a plain count. Fractions are admitted on CPU
/// and memory and round up to the next internal unit.
pub fn parse_quantity(input: &str, resource: Resource) -> Result<u64, QuantityError> {
    let trimmed = input.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (int_part, mut rest) = trimmed.split_at(digits_end);

    let mut frac_part = "";
    if let Some(tail) = rest.strip_prefix('.') {
        let frac_end = tail
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(tail.len());
        frac_part = &tail[..frac_end];
        rest = &tail[frac_end..];
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(QuantityError::Malformed(input.to_string()));
    }

    if resource == Resource::Pods && (!rest.is_empty() || !frac_part.is_empty()) {
        return Err(QuantityError::IntegerRequired {
            input: input.to_string(),
            resource,
        });
    }
    let (factor_num, factor_den) =
        suffix_factor(rest).ok_or_else(|| QuantityError::UnknownSuffix(input.to_string()))?;

    // mantissa = digits / 10^scale, kept exact in u128
    if int_part.len() + frac_part.len() > 24 {
        return Err(QuantityError::Overflow(input.to_string(), resource));
    }
    let mantissa: u128 = format!("{int_part}{frac_part}")
        .parse()
        .map_err(|_| QuantityError::Malformed(input.to_string()))?;
    let scale = 10u128.pow(frac_part.len() as u32);

    let base: u128 = match resource {
        Resource::Cpu => 1000,
        Resource::Memory | Resource::Pods => 1,
    };
    let units = mantissa
        .checked_mul(base)
        .and_then(|v| v.checked_mul(factor_num))
        .map(|v| div_ceil_u128(v, scale * factor_den))
        .ok_or_else(|| QuantityError::Overflow(input.to_string(), resource))?;
    u64::try_from(units).map_err(|_| QuantityError::Overflow(input.to_string(), resource))
}

/// Formats an internal-unit value back into a canonical quantity string.
///
/// Memory picks the largest binary suffix that divides evenly, so
/// `parse_quantity(&format_quantity(v, r), r) == v` for every value.
pub fn format_quantity(value: u64, resource: Resource) -> String {
    match resource {
        Resource::Cpu => format!("{value}m"),
        Resource::Pods => value.to_string(),
        Resource::Memory => {
            const BINARY: [(&str, u64); 6] = [
                ("Ei", 1 << 60),
                ("Pi", 1 << 50),
                ("Ti", 1 << 40),
                ("Gi", 1 << 30),
                ("Mi", 1 << 20),
                ("Ki", 1 << 10),
            ];
            for (suffix, factor) in BINARY {
                if value != 0 && value % factor == 0 {
                    return format!("{}{suffix}", value / factor);
                }
            }
            value.to_string()
        }
    }
}

/// Adds `percent` % on top of a value, rounding up.
pub fn percent_add_ceil(value: u64, percent: u32) -> u64 {
    let grown = div_ceil_u128(u128::from(value) * (100 + u128::from(percent)), 100);
    u64::try_from(grown).unwrap_or(u64::MAX)
}

/// A (cpu, memory, pods) triple in internal units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVector {
    /// CPU in millicores.
    pub cpu_m: u64,
    /// Memory in bytes.
    pub memory: u64,
    /// Pod count.
    pub pods: u64,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector {
        cpu_m: 0,
        memory: 0,
        pods: 0,
    };

    pub fn new(cpu_m: u64, memory: u64, pods: u64) -> Self {
        Self {
            cpu_m,
            memory,
            pods,
        }
    }

    pub fn get(&self, resource: Resource) -> u64 {
        match resource {
            Resource::Cpu => self.cpu_m,
            Resource::Memory => self.memory,
            Resource::Pods => self.pods,
        }
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        Self {
            cpu_m: self.cpu_m.max(other.cpu_m),
            memory: self.memory.max(other.memory),
            pods: self.pods.max(other.pods),
        }
    }

    /// True iff `self` is at least `demand` on every dimension.
    pub fn covers(&self, demand: &Self) -> bool {
        self.cpu_m >= demand.cpu_m && self.memory >= demand.memory && self.pods >= demand.pods
    }

    /// Component-wise subtraction, saturating at zero.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self {
            cpu_m: self.cpu_m.saturating_sub(other.cpu_m),
            memory: self.memory.saturating_sub(other.memory),
            pods: self.pods.saturating_sub(other.pods),
        }
    }

    /// Divides every component by `n`, rounding up.
    pub fn div_ceil(self, n: u64) -> Self {
        debug_assert!(n > 0);
        Self {
            cpu_m: self.cpu_m.div_ceil(n),
            memory: self.memory.div_ceil(n),
            pods: self.pods.div_ceil(n),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Lexicographic ordering key over (cpu, memory, pods), the order used
    /// for weakest-node selection.
    pub fn lexicographic_key(&self) -> (u64, u64, u64) {
        (self.cpu_m, self.memory, self.pods)
    }
}

impl Add for ResourceVector {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            cpu_m: self.cpu_m.saturating_add(rhs.cpu_m),
            memory: self.memory.saturating_add(rhs.memory),
            pods: self.pods.saturating_add(rhs.pods),
        }
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} memory={} pods={}",
            format_quantity(self.cpu_m, Resource::Cpu),
            format_quantity(self.memory, Resource::Memory),
            self.pods
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MI: u64 = 1 << 20;
    const GI: u64 = 1 << 30;

    #[test]
    fn test_parse_cpu() {
        assert_eq!(parse_quantity("2", Resource::Cpu), Ok(2000));
        assert_eq!(parse_quantity("100m", Resource::Cpu), Ok(100));
        assert_eq!(parse_quantity("0.5", Resource::Cpu), Ok(500));
        assert_eq!(parse_quantity("1.5", Resource::Cpu), Ok(1500));
        // fractional millicores round up
        assert_eq!(parse_quantity("0.0001", Resource::Cpu), Ok(1));
        assert_eq!(parse_quantity("1.0001", Resource::Cpu), Ok(1001));
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_quantity("100Mi", Resource::Memory), Ok(100 * MI));
        assert_eq!(parse_quantity("16Gi", Resource::Memory), Ok(16 * GI));
        assert_eq!(parse_quantity("1500M", Resource::Memory), Ok(1_500_000_000));
        assert_eq!(parse_quantity("1k", Resource::Memory), Ok(1000));
        assert_eq!(parse_quantity("1K", Resource::Memory), Ok(1000));
        assert_eq!(parse_quantity("1.5Gi", Resource::Memory), Ok(3 * GI / 2));
        assert_eq!(parse_quantity("128", Resource::Memory), Ok(128));
    }

    #[test]
    fn test_parse_pods() {
        assert_eq!(parse_quantity("110", Resource::Pods), Ok(110));
        assert!(matches!(
            parse_quantity("1k", Resource::Pods),
            Err(QuantityError::IntegerRequired { .. })
        ));
        assert!(matches!(
            parse_quantity("1.5", Resource::Pods),
            Err(QuantityError::IntegerRequired { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_quantity("", Resource::Cpu),
            Err(QuantityError::Malformed(_))
        ));
        assert!(matches!(
            parse_quantity("abc", Resource::Cpu),
            Err(QuantityError::Malformed(_))
        ));
        assert!(matches!(
            parse_quantity("100x", Resource::Memory),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            parse_quantity("99999999999999999999999999Gi", Resource::Memory),
            Err(QuantityError::Overflow(..))
        ));
    }

    #[test]
    fn test_format_round_trips() {
        for value in [100, 1500, 4000] {
            let text = format_quantity(value, Resource::Cpu);
            assert_eq!(parse_quantity(&text, Resource::Cpu), Ok(value));
        }
        for value in [512, 200 * MI, 8 * GI, 3 * GI / 2, 1000] {
            let text = format_quantity(value, Resource::Memory);
            assert_eq!(parse_quantity(&text, Resource::Memory), Ok(value));
        }
        assert_eq!(format_quantity(8 * GI, Resource::Memory), "8Gi");
        assert_eq!(format_quantity(200 * MI, Resource::Memory), "200Mi");
    }

    #[test]
    fn test_percent_add_ceil_rounds_up() {
        assert_eq!(percent_add_ceil(100, 10), 110);
        assert_eq!(percent_add_ceil(5, 10), 6); // 5.5 rounds up
        assert_eq!(percent_add_ceil(101, 10), 112); // 111.1 rounds up
        assert_eq!(percent_add_ceil(0, 10), 0);
        assert_eq!(percent_add_ceil(7, 0), 7);
    }

    #[test]
    fn test_vector_arithmetic() {
        let a = ResourceVector::new(500, GI, 1);
        let b = ResourceVector::new(1500, GI / 2, 3);
        assert_eq!(a + b, ResourceVector::new(2000, 3 * GI / 2, 4));
        assert_eq!(a.max(b), ResourceVector::new(1500, GI, 3));
        assert_eq!(
            b.saturating_sub(a),
            ResourceVector::new(1000, 0, 2)
        );
        assert_eq!(
            ResourceVector::new(10, 10, 10).div_ceil(3),
            ResourceVector::new(4, 4, 4)
        );
    }

    #[test]
    fn test_covers_requires_every_dimension() {
        let capacity = ResourceVector::new(4000, 8 * GI, 110);
        assert!(capacity.covers(&ResourceVector::new(4000, 8 * GI, 110)));
        assert!(capacity.covers(&ResourceVector::ZERO));
        assert!(!capacity.covers(&ResourceVector::new(4001, GI, 1)));
        assert!(!capacity.covers(&ResourceVector::new(1, 8 * GI + 1, 1)));
        assert!(!capacity.covers(&ResourceVector::new(1, 1, 111)));
    }
}
