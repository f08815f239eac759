/// A set of inclusive integer intervals answering membership queries in
/// logarithmic time.
///
/// Intervals may be supplied in any order and may overlap or nest. On
/// construction they are sorted by lower bound and overlapping intervals
/// are merged, so every stored interval is disjoint from its neighbours:
///
/// ```text
/// input:  [(10,12), (11,15), (30,40), (32,33)]
/// stored: [(10,15), (30,40)]
/// ```
///
/// A query then only has to find the last interval whose lower bound is
/// `<=` the value and compare against its upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet<T> {
    ranges: Vec<(T, T)>,
}

impl<T: Ord + Copy> RangeSet<T> {
    /// Builds the set from `(low, high)` pairs. Pairs with `low > high` are
    /// flipped rather than dropped.
    pub fn new(input: impl IntoIterator<Item = (T, T)>) -> Self {
        let mut ranges: Vec<(T, T)> = input
            .into_iter()
            .map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
            .collect();

        ranges.sort_unstable_by_key(|&(low, _)| low);

        let mut merged: Vec<(T, T)> = Vec::with_capacity(ranges.len());
        for (low, high) in ranges {
            match merged.last_mut() {
                Some((_, cur_high)) if low <= *cur_high => {
                    if high > *cur_high {
                        *cur_high = high;
                    }
                }
                _ => merged.push((low, high)),
            }
        }
        merged.shrink_to_fit();

        Self { ranges: merged }
    }

    /// Whether `value` falls inside any interval.
    pub fn contains(&self, value: T) -> bool {
        let idx = self.ranges.partition_point(|&(low, _)| low <= value);
        idx > 0 && self.ranges[idx - 1].1 >= value
    }

    /// Number of disjoint intervals left after merging.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl<T> Default for RangeSet<T> {
    fn default() -> Self {
        Self { ranges: Vec::new() }
    }
}
