//! Per-axis slice specifications
//!
//! A slice spec selects a rectangular sub-region of an extent, using the
//! same conventions as array slicing: negative positions count from the
//! end of the axis and out-of-range bounds are clamped.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One axis of a slice spec
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceItem {
    /// A single position. The axis is kept with length 1.
    Index(i64),
    /// A half-open range `start..stop`. Missing bounds select to the
    /// start/end of the axis.
    Range {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
}

impl SliceItem {
    /// `start..stop` with unit step
    pub fn range(start: i64, stop: i64) -> Self {
        SliceItem::Range {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    /// The whole axis (`:`)
    pub fn full() -> Self {
        SliceItem::Range {
            start: None,
            stop: None,
            step: None,
        }
    }

    /// Resolve against an axis of length `dim`, returning the clamped
    /// `(start, stop)` pair relative to the axis origin.
    pub(crate) fn resolve(&self, dim: i64) -> Result<(i64, i64)> {
        match *self {
            SliceItem::Index(i) => {
                let pos = if i < 0 { i + dim } else { i };
                if pos < 0 || pos >= dim {
                    return Err(Error::contract(format!(
                        "index {} out of range for axis of length {}",
                        i, dim
                    )));
                }
                Ok((pos, pos + 1))
            }
            SliceItem::Range { start, stop, step } => {
                if let Some(step) = step {
                    if step != 1 {
                        return Err(Error::Unsupported(format!(
                            "slice step {} (only 1 is supported)",
                            step
                        )));
                    }
                }
                let start = clamp_bound(start.unwrap_or(0), dim);
                let stop = clamp_bound(stop.unwrap_or(dim), dim);
                Ok((start, stop.max(start)))
            }
        }
    }
}

fn clamp_bound(pos: i64, dim: i64) -> i64 {
    let pos = if pos < 0 { pos + dim } else { pos };
    pos.clamp(0, dim)
}

impl fmt::Display for SliceItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceItem::Index(i) => write!(f, "{}", i),
            SliceItem::Range { start, stop, .. } => {
                if let Some(s) = start {
                    write!(f, "{}", s)?;
                }
                write!(f, ":")?;
                if let Some(s) = stop {
                    write!(f, "{}", s)?;
                }
                Ok(())
            }
        }
    }
}

/// Parse a comma separated spec such as `"1:3, :, -1"`.
pub fn parse_slice_spec(text: &str) -> Result<Vec<SliceItem>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',').map(|part| parse_item(part.trim())).collect()
}

fn parse_item(part: &str) -> Result<SliceItem> {
    let bad = || Error::contract(format!("invalid slice item '{}'", part));
    let parse_opt = |s: &str| -> Result<Option<i64>> {
        let s = s.trim();
        if s.is_empty() {
            Ok(None)
        } else {
            s.parse().map(Some).map_err(|_| bad())
        }
    };

    let pieces: Vec<&str> = part.split(':').collect();
    match pieces.as_slice() {
        [index] => index.trim().parse().map(SliceItem::Index).map_err(|_| bad()),
        [start, stop] => Ok(SliceItem::Range {
            start: parse_opt(start)?,
            stop: parse_opt(stop)?,
            step: None,
        }),
        [start, stop, step] => Ok(SliceItem::Range {
            start: parse_opt(start)?,
            stop: parse_opt(stop)?,
            step: parse_opt(step)?,
        }),
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_clamps() {
        assert_eq!(SliceItem::range(-20, 100).resolve(10).unwrap(), (0, 10));
        assert_eq!(SliceItem::range(2, 5).resolve(10).unwrap(), (2, 5));
        assert_eq!(SliceItem::range(7, 3).resolve(10).unwrap(), (7, 7));
    }

    #[test]
    fn test_negative_positions() {
        assert_eq!(SliceItem::range(-3, -1).resolve(10).unwrap(), (7, 9));
        assert_eq!(SliceItem::Index(-1).resolve(10).unwrap(), (9, 10));
    }

    #[test]
    fn test_index_out_of_range() {
        assert!(matches!(
            SliceItem::Index(10).resolve(10),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_step_unsupported() {
        let item = SliceItem::Range {
            start: None,
            stop: None,
            step: Some(2),
        };
        assert!(matches!(item.resolve(10), Err(Error::Unsupported(_))));

        let unit = SliceItem::Range {
            start: None,
            stop: None,
            step: Some(1),
        };
        assert_eq!(unit.resolve(4).unwrap(), (0, 4));
    }

    #[test]
    fn test_parse_spec() {
        let spec = parse_slice_spec("1:3, :, -1, ::1").unwrap();
        assert_eq!(
            spec,
            vec![
                SliceItem::range(1, 3),
                SliceItem::full(),
                SliceItem::Index(-1),
                SliceItem::Range {
                    start: None,
                    stop: None,
                    step: Some(1)
                },
            ]
        );
        assert!(parse_slice_spec("a:b").is_err());
        assert!(parse_slice_spec("").unwrap().is_empty());
    }
}
