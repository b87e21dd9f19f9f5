/// Inclusive byte offsets into a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total_len: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_len)
    }
}

/// Parses a `Range` header value against a resource of `total_len` bytes.
///
/// Ranges are returned in the order given, without merging. `None` means the
/// header is malformed or at least one range is not satisfiable.
pub fn parse_ranges(header: &str, total_len: u64) -> Option<Vec<ByteRange>> {
    let specs = header.trim().strip_prefix("bytes=")?;
    if total_len == 0 {
        return None;
    }

    specs
        .split(',')
        .map(|spec| parse_range_spec(spec.trim(), total_len))
        .collect()
}

fn parse_range_spec(spec: &str, total_len: u64) -> Option<ByteRange> {
    let last = total_len - 1;

    let (start, end) = if let Some(start) = spec.strip_suffix('-').filter(|s| !s.is_empty()) {
        // `N-` runs to the end; a negative N counts back from it.
        let start = start.parse::<i64>().ok()?;
        let start = if start < 0 {
            total_len.saturating_sub(start.unsigned_abs())
        } else {
            start as u64
        };
        (start, last)
    } else if let Some(suffix) = spec.strip_prefix('-') {
        let suffix = suffix.parse::<u64>().ok()?;
        (total_len.saturating_sub(suffix), last)
    } else if let Some((start, end)) = spec.split_once('-') {
        (start.parse::<u64>().ok()?, end.parse::<u64>().ok()?)
    } else {
        let offset = spec.parse::<u64>().ok()?;
        (offset, offset)
    };

    if start > end || start >= total_len || end >= total_len {
        return None;
    }
    Some(ByteRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(pairs: &[(u64, u64)]) -> Option<Vec<ByteRange>> {
        Some(pairs.iter().map(|&(s, e)| ByteRange::new(s, e)).collect())
    }

    #[test]
    fn single_forms() {
        assert_eq!(parse_ranges("bytes=0-0", 10), ranges(&[(0, 0)]));
        assert_eq!(parse_ranges("bytes=-5", 10), ranges(&[(5, 9)]));
        assert_eq!(parse_ranges("bytes=3", 10), ranges(&[(3, 3)]));
        assert_eq!(parse_ranges("bytes=7-", 10), ranges(&[(7, 9)]));
        assert_eq!(parse_ranges("bytes=2-6", 10), ranges(&[(2, 6)]));
    }

    #[test]
    fn negative_open_start_counts_from_end() {
        assert_eq!(parse_ranges("bytes=-3-", 10), ranges(&[(7, 9)]));
        assert_eq!(parse_ranges("bytes=-30-", 10), ranges(&[(0, 9)]));
        assert_eq!(parse_ranges("bytes=-30", 10), ranges(&[(0, 9)]));
    }

    #[test]
    fn unsatisfiable_or_malformed() {
        assert_eq!(parse_ranges("bytes=8-20", 10), None);
        assert_eq!(parse_ranges("bytes=5-2", 10), None);
        assert_eq!(parse_ranges("bytes=10", 10), None);
        assert_eq!(parse_ranges("bytes=10-", 10), None);
        assert_eq!(parse_ranges("bytes=-0", 10), None);
        assert_eq!(parse_ranges("bytes=a-b", 10), None);
        assert_eq!(parse_ranges("items=0-1", 10), None);
        assert_eq!(parse_ranges("bytes=0-0", 0), None);
        assert_eq!(parse_ranges("bytes=0-1,9-12", 10), None);
    }

    #[test]
    fn multiple_ranges_keep_order_and_overlap() {
        assert_eq!(
            parse_ranges("bytes=6-8, 0-1,0-1", 10),
            ranges(&[(6, 8), (0, 1), (0, 1)])
        );
    }

    #[test]
    fn content_range_header_value() {
        let range = ByteRange::new(2, 5);
        assert_eq!(range.len(), 4);
        assert_eq!(range.content_range(10), "bytes 2-5/10");
    }
}
