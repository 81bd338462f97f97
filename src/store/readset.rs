// Tracks the union of intervals over the keyspace a transaction has read.
// --(------)------[---]-----
//   /a/     /a0   k   k
// Ranges are appended as-is; a transaction records one namespace scan and a
// handful of point reads, so there is nothing to gain from normalizing.
use std::ops::Bound;

#[derive(Debug, Default)]
pub(crate) struct ReadSet {
    ranges: Vec<(Bound<Vec<u8>>, Bound<Vec<u8>>)>,
}

impl ReadSet {
    pub(crate) fn new() -> Self {
        ReadSet { ranges: Vec::new() }
    }

    pub(crate) fn add_point(&mut self, key: &[u8]) {
        self.ranges
            .push((Bound::Included(key.to_vec()), Bound::Included(key.to_vec())));
    }

    pub(crate) fn add_range(&mut self, lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) {
        self.ranges.push((lower.clone(), upper.clone()));
    }

    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.ranges.iter().any(|(lower, upper)| {
            let above = match lower {
                Bound::Included(b) => key >= b.as_slice(),
                Bound::Excluded(b) => key > b.as_slice(),
                Bound::Unbounded => true,
            };
            let below = match upper {
                Bound::Included(b) => key <= b.as_slice(),
                Bound::Excluded(b) => key < b.as_slice(),
                Bound::Unbounded => true,
            };
            above && below
        })
    }
}

#[test]
fn test_read_set() {
    let mut reads = ReadSet::new();
    assert!(!reads.contains(b"anything"));

    reads.add_point(b"/meta/version");
    assert!(reads.contains(b"/meta/version"));
    assert!(!reads.contains(b"/meta/versio"));
    assert!(!reads.contains(b"/meta/version2"));

    reads.add_range(
        &Bound::Excluded(b"/sensors/".to_vec()),
        &Bound::Excluded(b"/sensors0".to_vec()),
    );
    assert!(reads.contains(b"/sensors/a"));
    assert!(reads.contains(b"/sensors/\xff"));
    assert!(!reads.contains(b"/sensors/"));
    assert!(!reads.contains(b"/sensors0"));
    assert!(!reads.contains(b"/sensorz"));

    reads.add_range(&Bound::Included(b"zz".to_vec()), &Bound::Unbounded);
    assert!(reads.contains(b"zz"));
    assert!(reads.contains(b"zzzzz"));
    assert!(!reads.contains(b"zy"));
}
