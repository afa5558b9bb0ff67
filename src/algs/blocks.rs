//! Contiguous block splits shared by the derived decompositions.

use std::ops::Range;

/// Block `index` of `n` items split into `parts` contiguous blocks. The first
/// `n % parts` blocks get one extra item.
pub fn even_block(n: usize, parts: usize, index: usize) -> Range<usize> {
    if parts == 0 || index >= parts {
        return 0..0;
    }
    let base = n / parts;
    let extra = n % parts;
    let start = index * base + index.min(extra);
    let len = base + usize::from(index < extra);
    start..start + len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remainder_goes_to_lowest_blocks() {
        let blocks: Vec<_> = (0..4).map(|i| even_block(10, 4, i)).collect();
        assert_eq!(blocks, vec![0..3, 3..6, 6..8, 8..10]);
    }

    #[test]
    fn more_parts_than_items() {
        let lens: Vec<_> = (0..5).map(|i| even_block(3, 5, i).len()).collect();
        assert_eq!(lens, vec![1, 1, 1, 0, 0]);
        assert_eq!(even_block(3, 0, 0), 0..0);
        assert_eq!(even_block(3, 2, 7), 0..0);
    }
}
