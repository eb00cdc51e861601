//! IMAP sequence sets (`1:3,5,7:*`).

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqNum {
    Value(u32),
    /// `*`, the largest number in use.
    Star,
}

impl SeqNum {
    fn resolve(self, max: u32) -> u32 {
        match self {
            SeqNum::Value(v) => v,
            SeqNum::Star => max,
        }
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqNum::Value(v) => write!(f, "{v}"),
            SeqNum::Star => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: SeqNum,
    pub end: SeqNum,
}

impl Range {
    pub fn single(n: u32) -> Self {
        Self {
            start: SeqNum::Value(n),
            end: SeqNum::Value(n),
        }
    }

    /// Bounds with `*` resolved, low first.
    pub fn bounds(&self, max: u32) -> (u32, u32) {
        let a = self.start.resolve(max);
        let b = self.end.resolve(max);
        (a.min(b), a.max(b))
    }

    pub fn contains(&self, n: u32, max: u32) -> bool {
        let (low, high) = self.bounds(max);
        (low..=high).contains(&n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid sequence set: {0}")]
pub struct SequenceError(pub String);

/// Union of ranges addressing either sequence numbers or UIDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceSet {
    pub ranges: Vec<Range>,
}

impl SequenceSet {
    pub fn from_values(values: &[u32]) -> Self {
        Self {
            ranges: values.iter().map(|v| Range::single(*v)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// `max` is the value `*` stands for.
    pub fn contains(&self, n: u32, max: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(n, max))
    }

    /// Renders `values` compactly, joining consecutive runs.
    pub fn compact(values: &[u32]) -> String {
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut out: Vec<String> = Vec::new();
        let mut iter = sorted.into_iter().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if start == end {
                out.push(start.to_string());
            } else {
                out.push(format!("{start}:{end}"));
            }
        }
        out.join(",")
    }
}

impl FromStr for SequenceSet {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_num = |part: &str| -> Result<SeqNum, SequenceError> {
            if part == "*" {
                return Ok(SeqNum::Star);
            }
            match part.parse::<u32>() {
                Ok(0) | Err(_) => Err(SequenceError(s.to_string())),
                Ok(v) => Ok(SeqNum::Value(v)),
            }
        };

        let mut ranges = Vec::new();
        for item in s.split(',') {
            let range = match item.split_once(':') {
                Some((a, b)) => Range {
                    start: parse_num(a)?,
                    end: parse_num(b)?,
                },
                None => {
                    let n = parse_num(item)?;
                    Range { start: n, end: n }
                }
            };
            ranges.push(range);
        }
        Ok(Self { ranges })
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if r.start == r.end {
                write!(f, "{}", r.start)?;
            } else {
                write!(f, "{}:{}", r.start, r.end)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_and_contains() {
        let set: SequenceSet = "1:3,5,7:*".parse().unwrap();
        assert_eq!(set.ranges.len(), 3);
        assert!(set.contains(2, 10));
        assert!(!set.contains(4, 10));
        assert!(set.contains(10, 10));
        assert!(!set.contains(11, 10));
        assert_eq!(set.to_string(), "1:3,5,7:*");
    }

    #[test]
    fn test_reversed_range() {
        let set: SequenceSet = "*:4".parse().unwrap();
        assert!(set.contains(4, 6));
        assert!(set.contains(6, 6));
        assert!(!set.contains(3, 6));
    }

    #[test]
    fn test_invalid() {
        assert!("0".parse::<SequenceSet>().is_err());
        assert!("a:3".parse::<SequenceSet>().is_err());
        assert!("".parse::<SequenceSet>().is_err());
    }

    #[test]
    fn test_compact() {
        assert_eq!(SequenceSet::compact(&[5, 1, 2, 3, 9]), "1:3,5,9");
        assert_eq!(SequenceSet::compact(&[]), "");
    }

    proptest! {
        #[test]
        fn test_compact_roundtrip_contains_exactly(values in proptest::collection::vec(1u32..200, 0..30)) {
            let compact = SequenceSet::compact(&values);
            prop_assume!(!compact.is_empty());
            let set: SequenceSet = compact.parse().unwrap();
            for n in 1..200u32 {
                prop_assert_eq!(set.contains(n, 200), values.contains(&n));
            }
        }
    }
}
