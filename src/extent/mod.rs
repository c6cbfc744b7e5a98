//! Extent geometry
//!
//! An [`Extent`] is an axis-aligned rectangular region of an N-dimensional
//! array, given by an inclusive upper-left corner and an exclusive
//! lower-right corner per axis. Extents may be *anchored* (they know the
//! shape of the array they are a region of) or unanchored.
//!
//! Everything in this module is pure: no I/O, no shared state.

mod ravel;
mod slice;

pub use ravel::{ravelled_pos, unravelled_pos};
pub use slice::{parse_slice_spec, SliceItem};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Maximum supported rank
pub const MAX_DIMS: usize = 32;

/// Tuple form of an extent: `(ul, lr, array_shape)`
pub type ExtentTuple = (Vec<i64>, Vec<i64>, Option<Vec<i64>>);

/// An N-dimensional rectangular region
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "ExtentTuple", into = "ExtentTuple")]
pub struct Extent {
    ul: Vec<i64>,
    lr: Vec<i64>,
    shape: Vec<i64>,
    array_shape: Option<Vec<i64>>,
    size: i64,
}

impl Extent {
    /// Build without validation. Callers guarantee equal ranks and
    /// `ul <= lr`; a size past `i64::MAX` saturates.
    fn build(ul: Vec<i64>, lr: Vec<i64>, array_shape: Option<Vec<i64>>) -> Self {
        debug_assert_eq!(ul.len(), lr.len());
        let shape: Vec<i64> = ul.iter().zip(&lr).map(|(u, l)| l - u).collect();
        let size = checked_size(&shape).unwrap_or(i64::MAX);
        Extent {
            ul,
            lr,
            shape,
            array_shape,
            size,
        }
    }

    /// Create an extent from its corners
    ///
    /// `array_shape` may be omitted, leaving the extent unanchored. All
    /// inputs must have the same rank, and every axis must satisfy
    /// `0 <= ul <= lr (<= array_shape)`.
    pub fn create(ul: &[i64], lr: &[i64], array_shape: Option<&[i64]>) -> Result<Self> {
        check_rank(ul.len(), lr.len())?;
        if ul.len() > MAX_DIMS {
            return Err(Error::contract(format!(
                "rank {} exceeds maximum of {}",
                ul.len(),
                MAX_DIMS
            )));
        }
        if let Some(shape) = array_shape {
            check_rank(ul.len(), shape.len())?;
        }

        for i in 0..ul.len() {
            let upper = array_shape.map_or(i64::MAX, |s| s[i]);
            if !(0 <= ul[i] && ul[i] <= lr[i] && lr[i] <= upper) {
                return Err(Error::contract(format!(
                    "axis {}: bounds {}..{} invalid for array dimension {}",
                    i, ul[i], lr[i], upper
                )));
            }
        }
        check_size(ul, lr)?;

        Ok(Extent::build(
            ul.to_vec(),
            lr.to_vec(),
            array_shape.map(<[i64]>::to_vec),
        ))
    }

    /// The extent covering a whole array of the given shape
    pub fn from_shape(shape: &[i64]) -> Self {
        Extent::build(vec![0; shape.len()], shape.to_vec(), Some(shape.to_vec()))
    }

    /// The canonical scalar extent (rank 0)
    pub fn scalar() -> Self {
        Extent::build(Vec::new(), Vec::new(), None)
    }

    /// Rebuild from [`Extent::to_tuple`] output
    pub fn from_tuple(tuple: ExtentTuple) -> Result<Self> {
        let (ul, lr, array_shape) = tuple;
        Extent::create(&ul, &lr, array_shape.as_deref())
    }

    pub fn to_tuple(&self) -> ExtentTuple {
        (self.ul.clone(), self.lr.clone(), self.array_shape.clone())
    }

    pub fn ndim(&self) -> usize {
        self.ul.len()
    }

    pub fn ul(&self) -> &[i64] {
        &self.ul
    }

    pub fn lr(&self) -> &[i64] {
        &self.lr
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn array_shape(&self) -> Option<&[i64]> {
        self.array_shape.as_deref()
    }

    /// Number of elements in the region
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn is_anchored(&self) -> bool {
        self.array_shape.is_some()
    }

    /// True if some axis has zero length
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether `other` lies entirely inside this extent
    pub fn contains(&self, other: &Extent) -> bool {
        self.ndim() == other.ndim()
            && (0..self.ndim()).all(|i| {
                self.ul[i] <= other.ul[i]
                    && other.ul[i] <= other.lr[i]
                    && other.lr[i] <= self.lr[i]
            })
    }

    /// Absolute per-axis ranges selecting this extent
    pub fn to_slice(&self) -> Vec<SliceItem> {
        self.ul
            .iter()
            .zip(&self.lr)
            .map(|(&u, &l)| SliceItem::range(u, l))
            .collect()
    }

    /// Linear offset of the upper-left corner in the full array
    pub fn ravelled_pos(&self) -> Result<i64> {
        let array_shape = self.anchored_shape()?;
        Ok(ravelled_pos(&self.ul, array_shape))
    }

    /// Map a linear index within this extent to the linear index in the
    /// full array.
    pub fn to_global(&self, idx: i64) -> Result<i64> {
        let array_shape = self.anchored_shape()?;
        let mut coord = unravelled_pos(idx, &self.shape);
        for (c, u) in coord.iter_mut().zip(&self.ul) {
            *c += u;
        }
        Ok(ravelled_pos(&coord, array_shape))
    }

    /// `to_global(0)`: the value the extent hashes by
    ///
    /// Extents sharing an origin but differing in shape collide.
    pub fn weak_hash(&self) -> Result<i64> {
        self.to_global(0)
    }

    /// Append a trivial `[0, 1)` axis
    pub fn add_dim(&self) -> Extent {
        let mut ul = self.ul.clone();
        let mut lr = self.lr.clone();
        ul.push(0);
        lr.push(1);
        let array_shape = self.array_shape.clone().map(|mut s| {
            s.push(1);
            s
        });
        Extent::build(ul, lr, array_shape)
    }

    fn anchored_shape(&self) -> Result<&[i64]> {
        self.array_shape
            .as_deref()
            .ok_or_else(|| Error::contract("operation requires an anchored extent"))
    }
}

impl TryFrom<ExtentTuple> for Extent {
    type Error = Error;

    fn try_from((ul, lr, array_shape): ExtentTuple) -> Result<Self> {
        // Translated extents may carry negative bounds or exceed their
        // array shape, so only rank, orientation and size are checked.
        check_rank(ul.len(), lr.len())?;
        if ul.len() > MAX_DIMS {
            return Err(Error::contract(format!(
                "rank {} exceeds maximum of {}",
                ul.len(),
                MAX_DIMS
            )));
        }
        if let Some(shape) = &array_shape {
            check_rank(ul.len(), shape.len())?;
            if shape.iter().any(|&d| d < 0) || checked_size(shape).is_none() {
                return Err(Error::contract(format!("invalid array shape {:?}", shape)));
            }
        }
        if let Some(i) = (0..ul.len()).find(|&i| ul[i] > lr[i]) {
            return Err(Error::contract(format!(
                "axis {}: upper-left {} is past lower-right {}",
                i, ul[i], lr[i]
            )));
        }
        check_size(&ul, &lr)?;
        Ok(Extent::build(ul, lr, array_shape))
    }
}

impl From<Extent> for ExtentTuple {
    fn from(ex: Extent) -> Self {
        (ex.ul, ex.lr, ex.array_shape)
    }
}

impl PartialEq for Extent {
    fn eq(&self, other: &Self) -> bool {
        self.ul == other.ul && self.lr == other.lr
    }
}

impl Eq for Extent {}

impl PartialOrd for Extent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match self.ul.cmp(&other.ul) {
            Ordering::Equal => None,
            ord => Some(ord),
        }
    }
}

impl Hash for Extent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Only the first element's position feeds the hash.
        self.ul.hash(state);
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Extent: ul = ({}), lr= ({})",
            join(&self.ul),
            join(&self.lr)
        )
    }
}

fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Product of `shape`, or `None` on overflow
fn checked_size(shape: &[i64]) -> Option<i64> {
    shape.iter().try_fold(1i64, |acc, &s| acc.checked_mul(s))
}

/// Every axis length and the element count must fit in an `i64`
fn check_size(ul: &[i64], lr: &[i64]) -> Result<()> {
    let shape = ul
        .iter()
        .zip(lr)
        .map(|(u, l)| l.checked_sub(*u))
        .collect::<Option<Vec<i64>>>();
    match shape.as_deref().and_then(checked_size) {
        Some(_) => Ok(()),
        None => Err(Error::contract(format!(
            "extent {:?}..{:?} has more than {} elements",
            ul,
            lr,
            i64::MAX
        ))),
    }
}

fn check_rank(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(Error::contract(format!(
            "rank mismatch: {} vs {}",
            expected, found
        )));
    }
    Ok(())
}

/// The overlap of two extents, or `None` if they do not overlap
///
/// The result keeps `a`'s array shape.
pub fn intersection(a: &Extent, b: &Extent) -> Result<Option<Extent>> {
    check_rank(a.ndim(), b.ndim())?;
    Ok(intersect_unchecked(a, b))
}

fn intersect_unchecked(a: &Extent, b: &Extent) -> Option<Extent> {
    let mut ul = Vec::with_capacity(a.ndim());
    let mut lr = Vec::with_capacity(a.ndim());
    for i in 0..a.ndim() {
        let u = a.ul[i].max(b.ul[i]);
        let l = a.lr[i].min(b.lr[i]);
        if u >= l {
            return None;
        }
        ul.push(u);
        lr.push(l);
    }
    Some(Extent::build(ul, lr, a.array_shape.clone()))
}

/// Apply a slice spec (relative to `extent`'s own shape) and return the
/// selected region in array coordinates
///
/// Axes not covered by `spec` are selected whole. Returns `None` when the
/// selection is empty.
pub fn compute_slice(extent: &Extent, spec: &[SliceItem]) -> Result<Option<Extent>> {
    if spec.len() > extent.ndim() {
        return Err(Error::contract(format!(
            "slice has {} items but extent has rank {}",
            spec.len(),
            extent.ndim()
        )));
    }

    let mut ul = Vec::with_capacity(extent.ndim());
    let mut lr = Vec::with_capacity(extent.ndim());
    for i in 0..extent.ndim() {
        let item = spec.get(i).copied().unwrap_or_else(SliceItem::full);
        let (start, stop) = item.resolve(extent.shape[i])?;
        if start == stop {
            return Ok(None);
        }
        ul.push(extent.ul[i] + start);
        lr.push(extent.ul[i] + stop);
    }

    Ok(Some(Extent::build(ul, lr, extent.array_shape.clone())))
}

/// Apply a slice spec to a whole array of shape `array_shape`
pub fn from_slice(spec: &[SliceItem], array_shape: &[i64]) -> Result<Option<Extent>> {
    compute_slice(&Extent::from_shape(array_shape), spec)
}

/// Re-express `b` relative to `a`'s upper-left corner
///
/// The result is anchored on `a`'s shape. If `b` is not contained in `a`
/// the bounds may be negative or exceed that shape.
pub fn offset_from(a: &Extent, b: &Extent) -> Result<Extent> {
    let (ul, lr): (Vec<i64>, Vec<i64>) = offset_slice(a, b)?.into_iter().unzip();
    Ok(Extent::build(ul, lr, Some(a.shape.clone())))
}

/// Per-axis `(start, stop)` of [`offset_from`], for direct indexing
pub fn offset_slice(a: &Extent, b: &Extent) -> Result<Vec<(i64, i64)>> {
    check_rank(a.ndim(), b.ndim())?;
    (0..a.ndim())
        .map(|i| {
            match (b.ul[i].checked_sub(a.ul[i]), b.lr[i].checked_sub(a.ul[i])) {
                (Some(start), Some(stop)) => Ok((start, stop)),
                _ => Err(Error::contract(format!(
                    "axis {}: offset of {} from {} overflows",
                    i, b, a
                ))),
            }
        })
        .collect()
}

/// Remove one axis, as a reduction over that axis would
///
/// A negative axis counts from the end. `None` reduces over everything
/// and yields the scalar extent.
pub fn drop_axis(extent: &Extent, axis: Option<i64>) -> Result<Extent> {
    let Some(axis) = axis else {
        return Ok(Extent::scalar());
    };

    let ndim = extent.ndim() as i64;
    let idx = if axis < 0 { axis + ndim } else { axis };
    if idx < 0 || idx >= ndim {
        return Err(Error::contract(format!(
            "axis {} out of range for rank {}",
            axis, ndim
        )));
    }
    let idx = idx as usize;

    let remove = |v: &[i64]| -> Vec<i64> {
        let mut v = v.to_vec();
        v.remove(idx);
        v
    };
    Ok(Extent::build(
        remove(&extent.ul),
        remove(&extent.lr),
        extent.array_shape.as_deref().map(remove),
    ))
}

/// Recover the array shape from a set of extents partitioning it
///
/// The extents must share a rank, be pairwise disjoint, and cover the
/// implied shape without gaps.
pub fn find_shape(extents: &[Extent]) -> Result<Vec<i64>> {
    let first = extents
        .first()
        .ok_or_else(|| Error::InvalidPartition("no extents given".into()))?;
    let ndim = first.ndim();

    let mut shape = vec![0i64; ndim];
    let mut covered = 0i64;
    for ex in extents {
        if ex.ndim() != ndim {
            return Err(Error::InvalidPartition(format!(
                "rank mismatch: {} vs {}",
                ndim,
                ex.ndim()
            )));
        }
        if ex.ul.iter().any(|&u| u < 0) {
            return Err(Error::InvalidPartition(format!("negative bound in {}", ex)));
        }
        for (s, &l) in shape.iter_mut().zip(&ex.lr) {
            *s = (*s).max(l);
        }
        covered = covered
            .checked_add(ex.size)
            .ok_or_else(|| Error::InvalidPartition("extents cover too many elements".into()))?;
    }

    for (i, a) in extents.iter().enumerate() {
        for b in &extents[i + 1..] {
            if intersect_unchecked(a, b).is_some() {
                return Err(Error::InvalidPartition(format!(
                    "{} overlaps {}",
                    a, b
                )));
            }
        }
    }

    let total = checked_size(&shape).ok_or_else(|| {
        Error::InvalidPartition(format!("shape {:?} has too many elements", shape))
    })?;
    if covered != total {
        return Err(Error::InvalidPartition(format!(
            "extents cover {} of {} elements",
            covered, total
        )));
    }

    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;

    fn ex(ul: &[i64], lr: &[i64], shape: &[i64]) -> Extent {
        Extent::create(ul, lr, Some(shape)).unwrap()
    }

    #[test]
    fn test_create_validates_rank() {
        let err = Extent::create(&[0, 0], &[1], None).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));

        let err = Extent::create(&[0, 0], &[1, 1], Some(&[4])).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
    }

    #[test]
    fn test_create_validates_bounds() {
        assert!(Extent::create(&[3], &[2], None).is_err());
        assert!(Extent::create(&[0], &[11], Some(&[10])).is_err());
        assert!(Extent::create(&[-1], &[2], None).is_err());
    }

    #[test]
    fn test_unanchored() {
        let e = Extent::create(&[1, 2], &[3, 5], None).unwrap();
        assert!(!e.is_anchored());
        assert_eq!(e.shape(), &[2, 3]);
        assert_eq!(e.size(), 6);
        assert!(e.to_global(0).is_err());
    }

    #[test]
    fn test_intersection_scenario() {
        let a = ex(&[0, 0], &[4, 4], &[10, 10]);
        let b = ex(&[2, 2], &[6, 6], &[10, 10]);
        let i = intersection(&a, &b).unwrap().unwrap();
        assert_eq!(i.ul(), &[2, 2]);
        assert_eq!(i.lr(), &[4, 4]);
        assert_eq!(i.size(), 4);
    }

    #[test]
    fn test_intersection_touching_is_empty() {
        let a = ex(&[0, 0], &[4, 4], &[10, 10]);
        let b = ex(&[4, 0], &[8, 4], &[10, 10]);
        assert!(intersection(&a, &b).unwrap().is_none());
    }

    #[test]
    fn test_intersection_rank_mismatch() {
        let a = Extent::from_shape(&[4, 4]);
        let b = Extent::from_shape(&[4]);
        assert!(matches!(
            intersection(&a, &b),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_compute_slice_relative_to_extent() {
        let e = ex(&[10, 20], &[20, 30], &[100, 100]);
        let s = compute_slice(&e, &[SliceItem::range(2, 5)]).unwrap().unwrap();
        assert_eq!(s.ul(), &[12, 20]);
        assert_eq!(s.lr(), &[15, 30]);
        assert_eq!(s.array_shape(), Some(&[100, 100][..]));
    }

    #[test]
    fn test_compute_slice_clamps_and_index() {
        let e = ex(&[10, 20], &[20, 30], &[100, 100]);
        let s = compute_slice(&e, &[SliceItem::range(-3, 50), SliceItem::Index(4)])
            .unwrap()
            .unwrap();
        assert_eq!(s.ul(), &[17, 24]);
        assert_eq!(s.lr(), &[20, 25]);
    }

    #[test]
    fn test_compute_slice_empty_and_errors() {
        let e = Extent::from_shape(&[5, 5]);
        assert!(compute_slice(&e, &[SliceItem::range(3, 3)])
            .unwrap()
            .is_none());

        let too_many = [SliceItem::full(), SliceItem::full(), SliceItem::full()];
        assert!(matches!(
            compute_slice(&e, &too_many),
            Err(Error::ContractViolation(_))
        ));

        let stepped = [SliceItem::Range {
            start: None,
            stop: None,
            step: Some(2),
        }];
        assert!(matches!(
            compute_slice(&e, &stepped),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_offset_from_and_slice() {
        let a = ex(&[10, 10], &[20, 20], &[100, 100]);
        let b = ex(&[12, 15], &[14, 20], &[100, 100]);
        let off = offset_from(&a, &b).unwrap();
        assert_eq!(off.ul(), &[2, 5]);
        assert_eq!(off.lr(), &[4, 10]);
        assert_eq!(off.array_shape(), Some(&[10, 10][..]));
        assert_eq!(offset_slice(&a, &b).unwrap(), vec![(2, 4), (5, 10)]);

        let outside = ex(&[0, 0], &[5, 5], &[100, 100]);
        assert_eq!(offset_from(&a, &outside).unwrap().ul(), &[-10, -10]);
    }

    #[test]
    fn test_offset_selects_subregion() {
        // Data addressed by `a` holds each element's global linear index.
        let shape = [8i64, 9];
        let a = ex(&[2, 1], &[7, 8], &shape);
        let data: Vec<i64> = (0..a.size()).map(|i| a.to_global(i).unwrap()).collect();

        let b = ex(&[3, 4], &[5, 7], &shape);
        let off = offset_from(&a, &b).unwrap();
        let mut picked = Vec::new();
        for r in off.ul()[0]..off.lr()[0] {
            for c in off.ul()[1]..off.lr()[1] {
                picked.push(data[ravelled_pos(&[r, c], a.shape()) as usize]);
            }
        }

        let expected: Vec<i64> = (0..b.size()).map(|i| b.to_global(i).unwrap()).collect();
        assert_eq!(picked, expected);
    }

    #[test]
    fn test_to_global() {
        let e = ex(&[1, 2], &[3, 4], &[5, 6]);
        assert_eq!(e.to_global(0).unwrap(), 8);
        assert_eq!(e.to_global(3).unwrap(), 15);
        assert_eq!(e.ravelled_pos().unwrap(), 8);
    }

    #[test]
    fn test_add_dim_and_drop_axis() {
        let e = ex(&[1, 2], &[3, 4], &[5, 6]);
        let promoted = e.add_dim();
        assert_eq!(promoted.ul(), &[1, 2, 0]);
        assert_eq!(promoted.lr(), &[3, 4, 1]);
        assert_eq!(promoted.array_shape(), Some(&[5, 6, 1][..]));

        let dropped = drop_axis(&e, Some(0)).unwrap();
        assert_eq!(dropped.ul(), &[2]);
        assert_eq!(dropped.array_shape(), Some(&[6][..]));

        let last = drop_axis(&e, Some(-1)).unwrap();
        assert_eq!(last.ul(), &[1]);

        let scalar = drop_axis(&e, None).unwrap();
        assert_eq!(scalar.ndim(), 0);
        assert_eq!(scalar, Extent::scalar());

        assert!(drop_axis(&e, Some(2)).is_err());
    }

    #[test]
    fn test_find_shape() {
        let shape = [10, 10];
        let parts = vec![
            ex(&[0, 0], &[5, 10], &shape),
            ex(&[5, 0], &[10, 4], &shape),
            ex(&[5, 4], &[10, 10], &shape),
        ];
        assert_eq!(find_shape(&parts).unwrap(), vec![10, 10]);
    }

    #[test]
    fn test_find_shape_rejects_gaps_and_overlaps() {
        let shape = [10, 10];
        let gapped = vec![ex(&[0, 0], &[5, 10], &shape), ex(&[6, 0], &[10, 10], &shape)];
        assert!(matches!(
            find_shape(&gapped),
            Err(Error::InvalidPartition(_))
        ));

        let overlapping = vec![ex(&[0, 0], &[6, 10], &shape), ex(&[5, 0], &[10, 10], &shape)];
        assert!(matches!(
            find_shape(&overlapping),
            Err(Error::InvalidPartition(_))
        ));

        assert!(find_shape(&[]).is_err());
    }

    #[test]
    fn test_ordering_and_equality() {
        let a = ex(&[0, 0], &[2, 2], &[10, 10]);
        let b = ex(&[0, 5], &[2, 7], &[10, 10]);
        let c = ex(&[0, 0], &[3, 3], &[10, 10]);
        assert!(a < b);
        assert!(b > a);
        assert_ne!(a, c);
        assert_eq!(a.partial_cmp(&c), None);

        // Equality ignores the array shape.
        let d = Extent::create(&[0, 0], &[2, 2], None).unwrap();
        assert_eq!(a, d);
    }

    #[test]
    fn test_weak_hash_collides_on_origin() {
        let a = ex(&[1, 1], &[2, 2], &[10, 10]);
        let b = ex(&[1, 1], &[5, 5], &[10, 10]);
        assert_eq!(a.weak_hash().unwrap(), b.weak_hash().unwrap());

        let digest = |e: &Extent| {
            let mut h = DefaultHasher::new();
            e.hash(&mut h);
            h.finish()
        };
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn test_display() {
        let e = ex(&[0, 1], &[2, 3], &[4, 4]);
        assert_eq!(e.to_string(), "Extent: ul = (0,1), lr= (2,3)");
    }

    #[test]
    fn test_serde_roundtrip_keeps_array_shape() {
        let e = ex(&[1, 2], &[3, 4], &[5, 6]);
        let bytes = bincode::serialize(&e).unwrap();
        let back: Extent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, e);
        assert_eq!(back.array_shape(), e.array_shape());
        assert_eq!(back.shape(), e.shape());
    }

    #[test]
    fn test_deserialize_rejects_inverted_bounds() {
        let tuple: ExtentTuple = (vec![3], vec![1], None);
        let bytes = bincode::serialize(&tuple).unwrap();
        assert!(bincode::deserialize::<Extent>(&bytes).is_err());
        assert!(matches!(
            Extent::try_from(tuple),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_deserialize_rejects_oversized() {
        let huge: ExtentTuple = (vec![i64::MIN, 0], vec![i64::MAX, 1], None);
        assert!(Extent::try_from(huge).is_err());

        let wide: ExtentTuple = (vec![0, 0], vec![i64::MAX, 2], None);
        assert!(Extent::try_from(wide).is_err());

        let bad_shape: ExtentTuple = (vec![0], vec![1], Some(vec![-4]));
        assert!(Extent::try_from(bad_shape).is_err());

        let too_deep: ExtentTuple = (vec![0; MAX_DIMS + 1], vec![1; MAX_DIMS + 1], None);
        assert!(Extent::try_from(too_deep).is_err());
    }

    #[test]
    fn test_deserialize_keeps_translated_bounds() {
        let a = ex(&[10, 10], &[20, 20], &[100, 100]);
        let outside = ex(&[0, 0], &[5, 5], &[100, 100]);
        let off = offset_from(&a, &outside).unwrap();
        let bytes = bincode::serialize(&off).unwrap();
        let back: Extent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.ul(), &[-10, -10]);
        assert_eq!(back.size(), 25);
    }

    #[test]
    fn test_create_rejects_size_overflow() {
        let err = Extent::create(&[0, 0], &[i64::MAX, 2], None).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));

        let e = Extent::create(&[0], &[i64::MAX], None).unwrap();
        assert_eq!(e.size(), i64::MAX);
    }

    #[test]
    fn test_contains_rejects_inverted() {
        let outer = Extent::from_shape(&[4]);
        let inverted: Extent = Extent::build(vec![3], vec![1], None);
        assert!(!outer.contains(&inverted));
        assert!(outer.contains(&Extent::create(&[1], &[3], None).unwrap()));
    }

    #[test]
    fn test_offset_overflow_is_error() {
        let a = Extent::create(&[i64::MAX - 1], &[i64::MAX], None).unwrap();
        let translated: ExtentTuple = (vec![-5], vec![-4], None);
        let b = Extent::try_from(translated).unwrap();
        assert!(matches!(
            offset_from(&b, &a),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_find_shape_overflow_is_invalid_partition() {
        let parts = vec![
            Extent::create(&[0, 0], &[i64::MAX, 1], None).unwrap(),
            Extent::create(&[0, 1], &[i64::MAX, 2], None).unwrap(),
        ];
        assert!(matches!(
            find_shape(&parts),
            Err(Error::InvalidPartition(_))
        ));
    }

    #[test]
    fn test_rank_zero() {
        let scalar = Extent::scalar();
        assert_eq!(scalar.size(), 1);
        assert!(drop_axis(&scalar, Some(0)).is_err());
        assert!(drop_axis(&scalar, Some(-1)).is_err());
        assert_eq!(drop_axis(&scalar, None).unwrap(), scalar);

        let promoted = scalar.add_dim();
        assert_eq!(promoted.ul(), &[0]);
        assert_eq!(promoted.lr(), &[1]);
        assert_eq!(promoted.size(), 1);
        assert!(!promoted.is_anchored());
    }

    #[test]
    fn test_tuple_roundtrip() {
        let e = ex(&[1, 2], &[3, 4], &[5, 6]);
        let back = Extent::from_tuple(e.to_tuple()).unwrap();
        assert_eq!(back, e);
    }

    prop_compose! {
        fn arb_extent(ndim: usize)(
            axes in prop::collection::vec((1i64..20, 0i64..20, 0i64..20), ndim),
        ) -> Extent {
            let shape: Vec<i64> = axes.iter().map(|(s, _, _)| *s).collect();
            let (ul, lr): (Vec<i64>, Vec<i64>) = axes
                .iter()
                .map(|(s, a, b)| {
                    let a = a % s;
                    let b = b % s;
                    (a.min(b), a.max(b) + 1)
                })
                .unzip();
            Extent::create(&ul, &lr, Some(&shape)).unwrap()
        }
    }

    fn arb_pair() -> impl Strategy<Value = (Extent, Extent)> {
        (1usize..5).prop_flat_map(|n| (arb_extent(n), arb_extent(n)))
    }

    proptest! {
        #[test]
        fn test_intersection_commutative((a, b) in arb_pair()) {
            prop_assert_eq!(
                intersection(&a, &b).unwrap(),
                intersection(&b, &a).unwrap()
            );
        }

        #[test]
        fn test_intersection_idempotent(a in (1usize..5).prop_flat_map(arb_extent)) {
            prop_assert_eq!(intersection(&a, &a).unwrap(), Some(a.clone()));
        }

        #[test]
        fn test_disjoint_axis_gives_empty((a, b) in arb_pair()) {
            let disjoint = (0..a.ndim()).any(|i| a.lr()[i] <= b.ul()[i] || b.lr()[i] <= a.ul()[i]);
            if disjoint {
                prop_assert!(intersection(&a, &b).unwrap().is_none());
            } else {
                prop_assert!(intersection(&a, &b).unwrap().is_some());
            }
        }

        #[test]
        fn test_slice_roundtrip(e in (1usize..=8).prop_flat_map(arb_extent)) {
            let array_shape = e.array_shape().unwrap().to_vec();
            let back = from_slice(&e.to_slice(), &array_shape).unwrap();
            prop_assert_eq!(back, Some(e));
        }
    }
}
