use rand::Rng;
use rand::seq::SliceRandom;

/// Split recipients across variants.
///
/// Recipients are shuffled, then each variant (in the given order) takes
/// `floor(n * split / 100)`; the last variant also takes whatever rounding
/// left over, so every recipient is assigned exactly once.
pub fn distribute<T, R: Rng + ?Sized>(
    mut recipients: Vec<T>,
    splits: &[f64],
    rng: &mut R,
) -> Vec<Vec<T>> {
    if splits.is_empty() {
        return Vec::new();
    }

    recipients.shuffle(rng);
    let total = recipients.len();
    let mut remaining = recipients.into_iter();
    let mut buckets = Vec::with_capacity(splits.len());

    for (index, split) in splits.iter().enumerate() {
        let bucket: Vec<T> = if index + 1 == splits.len() {
            remaining.by_ref().collect()
        } else {
            let take = ((total as f64) * split / 100.0).floor() as usize;
            remaining.by_ref().take(take).collect()
        };
        buckets.push(bucket);
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn remainder_goes_to_last_variant() {
        let mut rng = StdRng::seed_from_u64(7);
        let buckets = distribute((0..10).collect(), &[33.3, 33.3, 33.4], &mut rng);
        let sizes: Vec<usize> = buckets.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 4]);
    }

    #[test]
    fn every_recipient_assigned_once() {
        let mut rng = StdRng::seed_from_u64(42);
        let buckets = distribute((0..101).collect::<Vec<i32>>(), &[50.0, 50.0], &mut rng);
        assert_eq!(buckets[0].len(), 50);
        assert_eq!(buckets[1].len(), 51);

        let seen: HashSet<i32> = buckets.into_iter().flatten().collect();
        assert_eq!(seen.len(), 101);
    }

    #[test]
    fn empty_audience_gives_empty_buckets() {
        let mut rng = StdRng::seed_from_u64(1);
        let buckets = distribute(Vec::<i32>::new(), &[20.0, 80.0], &mut rng);
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(Vec::is_empty));
    }
}
