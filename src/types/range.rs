//! Range and multirange types and codecs.
//!
//! Bound ordering is lexicographic on `(value, rank)`: an inclusive lower
//! bound ranks before an exclusive one at the same value, and after it at
//! an upper bound. That single rule makes `lower <= upper` checks total and
//! gives adjacency a direct test.

use std::cmp::Ordering;

use chrono::Days;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::types::array::{parse_quoted, parse_unquoted};
use crate::types::{SessionContext, decode_value};
use crate::value::Value;

// range flag bits of the binary format
const RANGE_EMPTY: u8 = 0x01;
const RANGE_LB_INC: u8 = 0x02;
const RANGE_UB_INC: u8 = 0x04;
const RANGE_LB_INF: u8 = 0x08;
const RANGE_UB_INF: u8 = 0x10;

/// Compare two bound values of the same range element type.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Result<Ordering> {
    let incomparable = || Error::Decode(format!("incomparable range bounds: {a:?} vs {b:?}"));

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Ok(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).ok_or_else(incomparable);
    }
    match (a, b) {
        (Value::Numeric(x), Value::Numeric(y)) => Ok(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Ok(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Ok(x.cmp(y)),
        (Value::Time(x), Value::Time(y)) => Ok(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Ok(x.cmp(y)),
        (Value::TimestampTz(x), Value::TimestampTz(y)) => Ok(x.cmp(y)),
        _ => Err(incomparable()),
    }
}

/// One bound of a range. `value: None` means unbounded on that side.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: Option<Value>,
    pub inclusive: bool,
}

impl Bound {
    /// Rank used as comparison tiebreaker at equal values.
    fn rank(&self, is_upper: bool) -> i8 {
        match (is_upper, self.inclusive) {
            (false, true) => 0,  // [5 sorts first at a lower bound
            (false, false) => 1, // (5
            (true, true) => 0,   // 5]
            (true, false) => -1, // 5)
        }
    }
}

/// Compare bounds; `*_upper` tells which side each bound belongs to.
fn cmp_bounds(a: &Bound, a_upper: bool, b: &Bound, b_upper: bool) -> Result<Ordering> {
    match (&a.value, &b.value) {
        (None, None) => {
            if a_upper == b_upper {
                Ok(Ordering::Equal)
            } else if a_upper {
                Ok(Ordering::Greater) // +infinity vs -infinity
            } else {
                Ok(Ordering::Less)
            }
        }
        (None, Some(_)) => Ok(if a_upper {
            Ordering::Greater
        } else {
            Ordering::Less
        }),
        (Some(_), None) => Ok(if b_upper {
            Ordering::Less
        } else {
            Ordering::Greater
        }),
        (Some(x), Some(y)) => match compare_values(x, y)? {
            Ordering::Equal => Ok(a.rank(a_upper).cmp(&b.rank(b_upper))),
            other => Ok(other),
        },
    }
}

/// A PostgreSQL range value.
///
/// Invariant: `bounds` is `None` (empty) XOR lower ≤ upper; equal bounds
/// with an exclusive side collapse to empty at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    bounds: Option<(Bound, Bound)>,
}

impl Range {
    /// The empty range.
    pub fn empty() -> Self {
        Self { bounds: None }
    }

    /// Construct a range; `None` bound values are unbounded sides.
    pub fn new(
        lower: Option<Value>,
        upper: Option<Value>,
        lower_inc: bool,
        upper_inc: bool,
    ) -> Result<Self> {
        // an unbounded side is never inclusive
        let lower_inc = lower_inc && lower.is_some();
        let upper_inc = upper_inc && upper.is_some();

        if let (Some(lo), Some(hi)) = (&lower, &upper) {
            match compare_values(lo, hi)? {
                Ordering::Greater => {
                    return Err(Error::Decode(
                        "range lower bound must be less than or equal to upper bound".into(),
                    ));
                }
                Ordering::Equal if !(lower_inc && upper_inc) => {
                    // e.g. '[10,10)'::int4range is empty
                    return Ok(Self::empty());
                }
                _ => {}
            }
        }

        Ok(Self {
            bounds: Some((
                Bound {
                    value: lower,
                    inclusive: lower_inc,
                },
                Bound {
                    value: upper,
                    inclusive: upper_inc,
                },
            )),
        })
    }

    /// Rewrite to the canonical `[lo, hi)` form of a discrete range.
    fn normalize_discrete(mut self, increment: fn(&Value) -> Result<Value>) -> Result<Self> {
        let Some((lower, upper)) = &mut self.bounds else {
            return Ok(self);
        };
        if let Some(value) = &lower.value {
            if !lower.inclusive {
                lower.value = Some(increment(value)?);
                lower.inclusive = true;
            }
        }
        if let Some(value) = &upper.value {
            if upper.inclusive {
                upper.value = Some(increment(value)?);
                upper.inclusive = false;
            }
        }
        // normalization can move the bounds onto each other: `(4,5)` is empty
        if let (Some(lo), Some(hi)) = (&lower.value, &upper.value) {
            if compare_values(lo, hi)? == Ordering::Equal {
                return Ok(Self::empty());
            }
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn lower(&self) -> Option<&Value> {
        self.bounds.as_ref().and_then(|(lo, _)| lo.value.as_ref())
    }

    pub fn upper(&self) -> Option<&Value> {
        self.bounds.as_ref().and_then(|(_, hi)| hi.value.as_ref())
    }

    pub fn lower_inc(&self) -> bool {
        self.bounds.as_ref().is_some_and(|(lo, _)| lo.inclusive)
    }

    pub fn upper_inc(&self) -> bool {
        self.bounds.as_ref().is_some_and(|(_, hi)| hi.inclusive)
    }

    pub fn lower_inf(&self) -> bool {
        self.bounds.as_ref().is_some_and(|(lo, _)| lo.value.is_none())
    }

    pub fn upper_inf(&self) -> bool {
        self.bounds.as_ref().is_some_and(|(_, hi)| hi.value.is_none())
    }

    /// True when a value falls inside the range.
    pub fn contains_value(&self, value: &Value) -> Result<bool> {
        let Some((lower, upper)) = &self.bounds else {
            return Ok(false);
        };
        let probe = Bound {
            value: Some(value.clone()),
            inclusive: true,
        };
        Ok(cmp_bounds(lower, false, &probe, false)? != Ordering::Greater
            && cmp_bounds(&probe, true, upper, true)? != Ordering::Greater)
    }

    /// True when the ranges share at least one point.
    pub fn overlaps(&self, other: &Range) -> Result<bool> {
        let (Some((a_lo, a_hi)), Some((b_lo, b_hi))) = (&self.bounds, &other.bounds) else {
            return Ok(false);
        };
        Ok(cmp_bounds(a_hi, true, b_lo, false)? != Ordering::Less
            && cmp_bounds(a_lo, false, b_hi, true)? != Ordering::Greater)
    }

    /// True when the ranges touch without overlapping.
    pub fn is_adjacent_to(&self, other: &Range) -> Result<bool> {
        let (Some((a_lo, a_hi)), Some((b_lo, b_hi))) = (&self.bounds, &other.bounds) else {
            return Ok(false);
        };
        let touch = |x: &Bound, y: &Bound| -> Result<bool> {
            match (&x.value, &y.value) {
                (Some(xv), Some(yv)) => Ok(compare_values(xv, yv)? == Ordering::Equal
                    && (x.inclusive as u8 + y.inclusive as u8) == 1),
                _ => Ok(false),
            }
        };
        Ok(touch(a_lo, b_hi)? || touch(a_hi, b_lo)?)
    }

    /// Smallest range covering both inputs (ignores any gap between them).
    pub fn merge(&self, other: &Range) -> Result<Range> {
        let (Some((a_lo, a_hi)), Some((b_lo, b_hi))) = (&self.bounds, &other.bounds) else {
            return Ok(if self.is_empty() {
                other.clone()
            } else {
                self.clone()
            });
        };
        let lower = if cmp_bounds(a_lo, false, b_lo, false)? != Ordering::Greater {
            a_lo.clone()
        } else {
            b_lo.clone()
        };
        let upper = if cmp_bounds(a_hi, true, b_hi, true)? != Ordering::Less {
            a_hi.clone()
        } else {
            b_hi.clone()
        };
        Ok(Range {
            bounds: Some((lower, upper)),
        })
    }

    /// Set union; the inputs must overlap or be adjacent.
    pub fn union(&self, other: &Range) -> Result<Range> {
        if self.is_empty() {
            return Ok(other.clone());
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.overlaps(other)? || self.is_adjacent_to(other)? {
            self.merge(other)
        } else {
            Err(Error::Decode(
                "ranges do not overlap and are not adjacent".into(),
            ))
        }
    }

    fn cmp_lower(&self, other: &Range) -> Ordering {
        match (&self.bounds, &other.bounds) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some((a_lo, _)), Some((b_lo, _))) => {
                cmp_bounds(a_lo, false, b_lo, false).unwrap_or(Ordering::Equal)
            }
        }
    }
}

/// A normalized multirange: sorted, non-overlapping, non-adjacent ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiRange {
    ranges: Vec<Range>,
}

impl MultiRange {
    /// Normalize: drop empties, merge overlapping or adjacent constituents,
    /// sort by lower bound.
    pub fn new(ranges: Vec<Range>) -> Result<Self> {
        let mut worklist: Vec<Range> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
        let mut merged: Vec<Range> = Vec::new();

        let mut i = 0;
        while i < worklist.len() {
            let range = worklist[i].clone();
            i += 1;
            let mut position = None;
            for (j, existing) in merged.iter().enumerate() {
                if existing.overlaps(&range)? || existing.is_adjacent_to(&range)? {
                    position = Some(j);
                    break;
                }
            }
            match position {
                Some(j) => {
                    let existing = merged.swap_remove(j);
                    worklist.push(existing.merge(&range)?);
                }
                None => merged.push(range),
            }
        }

        merged.sort_by(|a, b| a.cmp_lower(b));
        Ok(Self { ranges: merged })
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

// === oid tables ===

/// Element type and discrete-increment rule of a range type.
#[derive(Debug, Clone, Copy)]
pub struct RangeSpec {
    pub elem_oid: Oid,
    increment: Option<fn(&Value) -> Result<Value>>,
}

fn incr_int(value: &Value) -> Result<Value> {
    let overflow = || Error::Decode("range bound out of range for integer type".into());
    match value {
        Value::Int4(v) => v.checked_add(1).map(Value::Int4).ok_or_else(overflow),
        Value::Int8(v) => v.checked_add(1).map(Value::Int8).ok_or_else(overflow),
        other => Err(Error::Decode(format!(
            "invalid integer range bound: {other:?}"
        ))),
    }
}

fn incr_date(value: &Value) -> Result<Value> {
    match value {
        Value::Date(d) => d
            .checked_add_days(Days::new(1))
            .map(Value::Date)
            .ok_or_else(|| Error::Decode("date range bound out of range".into())),
        // out-of-range bounds decoded as text stay as they are
        other => Ok(other.clone()),
    }
}

/// Look up a range oid.
pub fn range_of(range_oid: Oid) -> Option<RangeSpec> {
    let (elem_oid, increment): (Oid, Option<fn(&Value) -> Result<Value>>) = match range_oid {
        oid::INT4RANGE => (oid::INT4, Some(incr_int as _)),
        oid::INT8RANGE => (oid::INT8, Some(incr_int as _)),
        oid::DATERANGE => (oid::DATE, Some(incr_date as _)),
        oid::NUMRANGE => (oid::NUMERIC, None),
        oid::TSRANGE => (oid::TIMESTAMP, None),
        oid::TSTZRANGE => (oid::TIMESTAMPTZ, None),
        _ => return None,
    };
    Some(RangeSpec {
        elem_oid,
        increment,
    })
}

/// Look up a multirange oid.
pub fn multirange_of(multirange_oid: Oid) -> Option<RangeSpec> {
    let range_oid = match multirange_oid {
        oid::INT4MULTIRANGE => oid::INT4RANGE,
        oid::INT8MULTIRANGE => oid::INT8RANGE,
        oid::DATEMULTIRANGE => oid::DATERANGE,
        oid::NUMMULTIRANGE => oid::NUMRANGE,
        oid::TSMULTIRANGE => oid::TSRANGE,
        oid::TSTZMULTIRANGE => oid::TSTZRANGE,
        _ => return None,
    };
    range_of(range_oid)
}

/// Build a range from decoded bounds, applying discrete normalization.
pub fn make_range(
    spec: RangeSpec,
    lower: Option<Value>,
    upper: Option<Value>,
    lower_inc: bool,
    upper_inc: bool,
) -> Result<Range> {
    let range = Range::new(lower, upper, lower_inc, upper_inc)?;
    match spec.increment {
        Some(increment) => range.normalize_discrete(increment),
        None => Ok(range),
    }
}

// === binary codecs ===

fn invalid_range() -> Error {
    Error::Decode("invalid range value".into())
}

fn parse_binary_range(ctx: &SessionContext, spec: RangeSpec, raw: &[u8]) -> Result<Range> {
    let (&flags, mut rest) = raw.split_first().ok_or_else(invalid_range)?;

    if flags & RANGE_EMPTY != 0 {
        if !rest.is_empty() {
            return Err(invalid_range());
        }
        return Ok(Range::empty());
    }

    let mut read_bound = |infinite: bool| -> Result<Option<Value>> {
        if infinite {
            return Ok(None);
        }
        let len_bytes = rest.get(..4).ok_or_else(invalid_range)?;
        let len = i32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        if len < 0 {
            return Err(invalid_range());
        }
        let bytes = rest
            .get(4..4 + len as usize)
            .ok_or_else(invalid_range)?;
        rest = &rest[4 + len as usize..];
        decode_value(ctx, spec.elem_oid, FormatCode::Binary, bytes).map(Some)
    };

    let lower = read_bound(flags & RANGE_LB_INF != 0)?;
    let upper = read_bound(flags & RANGE_UB_INF != 0)?;
    if !rest.is_empty() {
        return Err(invalid_range());
    }

    make_range(
        spec,
        lower,
        upper,
        flags & RANGE_LB_INC != 0,
        flags & RANGE_UB_INC != 0,
    )
}

pub fn decode_binary_range(ctx: &SessionContext, spec: RangeSpec, raw: &[u8]) -> Result<Value> {
    parse_binary_range(ctx, spec, raw).map(|r| Value::Range(Box::new(r)))
}

pub fn decode_binary_multirange(
    ctx: &SessionContext,
    spec: RangeSpec,
    raw: &[u8],
) -> Result<Value> {
    let head = raw.get(..4).ok_or_else(invalid_range)?;
    let count = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
    let mut rest = &raw[4..];

    let mut ranges = Vec::with_capacity(count);
    for _ in 0..count {
        let len_bytes = rest.get(..4).ok_or_else(invalid_range)?;
        let len = i32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        if len < 0 {
            return Err(invalid_range());
        }
        let bytes = rest.get(4..4 + len as usize).ok_or_else(invalid_range)?;
        ranges.push(parse_binary_range(ctx, spec, bytes)?);
        rest = &rest[4 + len as usize..];
    }
    if !rest.is_empty() {
        return Err(invalid_range());
    }

    MultiRange::new(ranges).map(Value::MultiRange)
}

// === text codecs ===

/// Parse one textual range; returns the range and the consumed length.
fn parse_text_range(
    ctx: &SessionContext,
    spec: RangeSpec,
    buf: &[u8],
) -> Result<(Range, usize)> {
    if buf.starts_with(b"empty") {
        return Ok((Range::empty(), 5));
    }

    let open = *buf.first().ok_or_else(invalid_range)?;
    if open != b'[' && open != b'(' {
        return Err(invalid_range());
    }
    let mut pos = 1;

    let decode_bound = |bytes: &[u8]| decode_value(ctx, spec.elem_oid, FormatCode::Text, bytes);

    let lower = match *buf.get(pos).ok_or_else(invalid_range)? {
        b'"' => {
            let (bytes, consumed) = parse_quoted(&buf[pos..])?;
            pos += consumed;
            Some(decode_bound(&bytes)?)
        }
        b',' => None,
        _ => {
            let (bytes, consumed) = parse_unquoted(&buf[pos..], b",")?;
            pos += consumed;
            Some(decode_bound(bytes)?)
        }
    };

    if buf.get(pos) != Some(&b',') {
        return Err(invalid_range());
    }
    pos += 1;

    let upper = match *buf.get(pos).ok_or_else(invalid_range)? {
        b'"' => {
            let (bytes, consumed) = parse_quoted(&buf[pos..])?;
            pos += consumed;
            Some(decode_bound(&bytes)?)
        }
        b']' | b')' => None,
        _ => {
            let (bytes, consumed) = parse_unquoted(&buf[pos..], b"])")?;
            pos += consumed;
            Some(decode_bound(bytes)?)
        }
    };

    let close = *buf.get(pos).ok_or_else(invalid_range)?;
    if close != b']' && close != b')' {
        return Err(invalid_range());
    }
    pos += 1;

    let range = make_range(spec, lower, upper, open == b'[', close == b']')?;
    Ok((range, pos))
}

pub fn decode_text_range(ctx: &SessionContext, spec: RangeSpec, raw: &[u8]) -> Result<Value> {
    let (range, consumed) = parse_text_range(ctx, spec, raw)?;
    if consumed != raw.len() {
        return Err(invalid_range());
    }
    Ok(Value::Range(Box::new(range)))
}

pub fn decode_text_multirange(ctx: &SessionContext, spec: RangeSpec, raw: &[u8]) -> Result<Value> {
    if raw.first() != Some(&b'{') {
        return Err(invalid_range());
    }
    let mut pos = 1;
    let mut ranges = Vec::new();

    if raw.get(pos) == Some(&b'}') {
        pos += 1;
    } else {
        loop {
            let (range, consumed) = parse_text_range(ctx, spec, &raw[pos..])?;
            ranges.push(range);
            pos += consumed;
            match raw.get(pos) {
                Some(&b'}') => {
                    pos += 1;
                    break;
                }
                Some(&b',') => pos += 1,
                _ => return Err(invalid_range()),
            }
        }
    }

    if pos != raw.len() {
        return Err(invalid_range());
    }
    MultiRange::new(ranges).map(Value::MultiRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext::default()
    }

    fn int4_spec() -> RangeSpec {
        range_of(oid::INT4RANGE).unwrap()
    }

    fn int_range(lower: Option<i32>, upper: Option<i32>, bounds: &str) -> Range {
        make_range(
            int4_spec(),
            lower.map(Value::Int4),
            upper.map(Value::Int4),
            bounds.starts_with('['),
            bounds.ends_with(']'),
        )
        .unwrap()
    }

    #[test]
    fn test_discrete_normalization() {
        // (4, 10] normalizes to [5, 11)
        let range = int_range(Some(4), Some(10), "(]");
        assert_eq!(range.lower(), Some(&Value::Int4(5)));
        assert!(range.lower_inc());
        assert_eq!(range.upper(), Some(&Value::Int4(11)));
        assert!(!range.upper_inc());
        // structural equality after normalization
        assert_eq!(range, int_range(Some(5), Some(11), "[)"));
        // [a,b) == (a-1,b)
        assert_eq!(
            int_range(Some(5), Some(11), "[)"),
            int_range(Some(4), Some(11), "()")
        );
    }

    #[test]
    fn test_equal_bounds_exclusive_collapse_to_empty() {
        assert!(int_range(Some(10), Some(10), "[)").is_empty());
        assert!(int_range(Some(4), Some(5), "()").is_empty());
        assert!(!int_range(Some(10), Some(10), "[]").is_empty());
    }

    #[test]
    fn test_reversed_bounds_rejected() {
        assert!(
            make_range(
                int4_spec(),
                Some(Value::Int4(10)),
                Some(Value::Int4(5)),
                true,
                false
            )
            .is_err()
        );
    }

    #[test]
    fn test_union_laws() {
        let range = int_range(Some(1), Some(10), "[)");
        assert_eq!(range.union(&range).unwrap(), range);
        assert_eq!(range.union(&Range::empty()).unwrap(), range);
        assert_eq!(Range::empty().union(&range).unwrap(), range);
    }

    #[test]
    fn test_adjacency_and_union() {
        let a = int_range(Some(1), Some(5), "[)");
        let b = int_range(Some(5), Some(9), "[)");
        assert!(a.is_adjacent_to(&b).unwrap());
        assert!(!a.overlaps(&b).unwrap());
        assert_eq!(a.union(&b).unwrap(), int_range(Some(1), Some(9), "[)"));

        let c = int_range(Some(20), Some(30), "[)");
        assert!(a.union(&c).is_err());
    }

    #[test]
    fn test_contains_value() {
        let range = int_range(Some(1), Some(5), "[)");
        assert!(range.contains_value(&Value::Int4(1)).unwrap());
        assert!(range.contains_value(&Value::Int4(4)).unwrap());
        assert!(!range.contains_value(&Value::Int4(5)).unwrap());
        assert!(!Range::empty().contains_value(&Value::Int4(1)).unwrap());
    }

    #[test]
    fn test_text_range_decode() {
        let v = decode_text_range(&ctx(), int4_spec(), b"[1,10)").unwrap();
        assert_eq!(v, Value::Range(Box::new(int_range(Some(1), Some(10), "[)"))));

        let v = decode_text_range(&ctx(), int4_spec(), b"empty").unwrap();
        assert_eq!(v, Value::Range(Box::new(Range::empty())));

        // unbounded sides
        let v = decode_text_range(&ctx(), int4_spec(), b"(,10)").unwrap();
        let Value::Range(range) = v else { panic!() };
        assert!(range.lower_inf());
    }

    #[test]
    fn test_binary_range_roundtrip_shape() {
        // [1, 10) over int4: flags LB_INC, two 4-byte bounds
        let mut raw = vec![RANGE_LB_INC];
        raw.extend_from_slice(&4_i32.to_be_bytes());
        raw.extend_from_slice(&1_i32.to_be_bytes());
        raw.extend_from_slice(&4_i32.to_be_bytes());
        raw.extend_from_slice(&10_i32.to_be_bytes());

        let v = decode_binary_range(&ctx(), int4_spec(), &raw).unwrap();
        assert_eq!(v, Value::Range(Box::new(int_range(Some(1), Some(10), "[)"))));

        // text and binary renditions agree
        let t = decode_text_range(&ctx(), int4_spec(), b"[1,10)").unwrap();
        assert_eq!(v, t);
    }

    #[test]
    fn test_binary_range_empty_flag() {
        let v = decode_binary_range(&ctx(), int4_spec(), &[RANGE_EMPTY]).unwrap();
        assert_eq!(v, Value::Range(Box::new(Range::empty())));
        // empty flag with trailing bytes is malformed
        assert!(decode_binary_range(&ctx(), int4_spec(), &[RANGE_EMPTY, 0]).is_err());
    }

    #[test]
    fn test_binary_range_infinite_bounds() {
        let mut raw = vec![RANGE_LB_INF | RANGE_UB_INC];
        raw.extend_from_slice(&4_i32.to_be_bytes());
        raw.extend_from_slice(&7_i32.to_be_bytes());
        let Value::Range(range) = decode_binary_range(&ctx(), int4_spec(), &raw).unwrap() else {
            panic!()
        };
        assert!(range.lower_inf());
        // [ , 7] normalizes the upper bound to 8 exclusive
        assert_eq!(range.upper(), Some(&Value::Int4(8)));
    }

    #[test]
    fn test_multirange_normalizes() {
        // {[5,9), [1,3), [3,5)} merges and sorts into {[1,9)}
        let v = decode_text_multirange(&ctx(), int4_spec(), b"{[5,9),[1,3),[3,5)}").unwrap();
        let Value::MultiRange(mr) = v else { panic!() };
        assert_eq!(mr.ranges(), &[int_range(Some(1), Some(9), "[)")]);

        // disjoint ranges stay separate, sorted by lower bound
        let v = decode_text_multirange(&ctx(), int4_spec(), b"{[20,30),[1,3)}").unwrap();
        let Value::MultiRange(mr) = v else { panic!() };
        assert_eq!(
            mr.ranges(),
            &[
                int_range(Some(1), Some(3), "[)"),
                int_range(Some(20), Some(30), "[)")
            ]
        );
    }

    #[test]
    fn test_empty_multirange() {
        let v = decode_text_multirange(&ctx(), int4_spec(), b"{}").unwrap();
        let Value::MultiRange(mr) = v else { panic!() };
        assert!(mr.is_empty());
    }

    #[test]
    fn test_quoted_range_bound() {
        let spec = range_of(oid::TSRANGE).unwrap();
        let v = decode_text_range(
            &ctx(),
            spec,
            br#"["2023-01-01 00:00:00","2023-06-01 12:00:00")"#,
        )
        .unwrap();
        let Value::Range(range) = v else { panic!() };
        assert!(matches!(range.lower(), Some(Value::Timestamp(_))));
    }
}
