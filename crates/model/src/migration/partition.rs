use serde::{Deserialize, Serialize};

/// One unit of migration work: a slice of the source table's key space.
///
/// Wide-column sources carry a half-open token range `[token_min, token_max)`.
/// Sources that cannot expose ranges (document stores) persist
/// `(partition_id, partition_id)` as the token pair and the id is the sole
/// identity; that pair is part of the checkpoint-schema contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub partition_id: i32,
    pub token_min: i64,
    pub token_max: i64,
}

impl PartitionDescriptor {
    pub fn ranged(partition_id: i32, token_min: i64, token_max: i64) -> Self {
        Self {
            partition_id,
            token_min,
            token_max,
        }
    }

    pub fn rangeless(partition_id: i32) -> Self {
        Self {
            partition_id,
            token_min: partition_id as i64,
            token_max: partition_id as i64,
        }
    }

    pub fn has_range(&self) -> bool {
        self.token_min != self.token_max
    }

    /// True for the range that ends at the top of the ring, where the upper
    /// bound is inclusive (`i64::MAX` itself cannot act as an open bound).
    pub fn closes_ring(&self) -> bool {
        self.token_max == i64::MAX
    }
}

/// Splits the full Murmur3 token ring `[i64::MIN, i64::MAX]` into `count`
/// contiguous ranges of equal width. All ranges are half-open except the
/// last, which includes `i64::MAX`.
pub fn split_token_ring(count: usize) -> Vec<PartitionDescriptor> {
    let count = count.max(1);
    let span = (i64::MAX as i128) - (i64::MIN as i128) + 1;
    let step = span / count as i128;

    let mut ranges = Vec::with_capacity(count);
    for i in 0..count {
        let min = (i64::MIN as i128 + step * i as i128) as i64;
        let max = if i == count - 1 {
            i64::MAX
        } else {
            (i64::MIN as i128 + step * (i as i128 + 1)) as i64
        };
        ranges.push(PartitionDescriptor::ranged(i as i32, min, max));
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_split_covers_whole_token_space() {
        let ranges = split_token_ring(34);
        assert_eq!(ranges.len(), 34);
        assert_eq!(ranges[0].token_min, i64::MIN);
        assert_eq!(ranges[33].token_max, i64::MAX);

        // Adjacent ranges share the boundary token exactly once.
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].token_max, pair[1].token_min);
        }
        // Ids are dense and 0-based.
        for (i, r) in ranges.iter().enumerate() {
            assert_eq!(r.partition_id, i as i32);
        }
    }

    #[test]
    fn single_split_is_the_full_ring() {
        let ranges = split_token_ring(1);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].token_min, i64::MIN);
        assert_eq!(ranges[0].token_max, i64::MAX);
        assert!(ranges[0].closes_ring());
    }

    #[test]
    fn rangeless_descriptor_carries_id_as_token_pair() {
        let d = PartitionDescriptor::rangeless(7);
        assert_eq!(d.token_min, 7);
        assert_eq!(d.token_max, 7);
        assert!(!d.has_range());
    }
}
