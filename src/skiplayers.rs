//! `--skipLayers` range-expression parsing (SPEC_FULL.md §10.6): a small
//! standalone parser reused directly by the orchestrator's layer-selection
//! logic, not just a CLI-layer convenience.

use crate::{error::AlignError, tile::LayerIndex};

/// A parsed `--skipLayers` expression, e.g. `3,5-7,12`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkipSet {
    ranges: Vec<(u32, u32)>,
}

impl SkipSet {
    pub fn empty() -> Self {
        SkipSet::default()
    }

    pub fn parse(expr: &str) -> Result<Self, AlignError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(SkipSet::empty());
        }

        let mut ranges = Vec::new();
        for term in expr.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let parse_err = || AlignError::InputParse {
                path: std::path::Path::new("--skipLayers").to_path_buf(),
                source: anyhow::anyhow!("invalid skipLayers term {term:?}"),
            };

            if let Some((lo, hi)) = term.split_once('-') {
                let lo: u32 = lo.trim().parse().map_err(|_| parse_err())?;
                let hi: u32 = hi.trim().parse().map_err(|_| parse_err())?;
                if lo > hi {
                    return Err(parse_err());
                }
                ranges.push((lo, hi));
            } else {
                let v: u32 = term.parse().map_err(|_| parse_err())?;
                ranges.push((v, v));
            }
        }
        Ok(SkipSet { ranges })
    }

    pub fn contains(&self, layer: LayerIndex) -> bool {
        self.ranges.iter().any(|&(lo, hi)| layer.0 >= lo && layer.0 <= hi)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("3,5-7,12", 3, true)]
    #[test_case("3,5-7,12", 4, false)]
    #[test_case("3,5-7,12", 6, true)]
    #[test_case("3,5-7,12", 12, true)]
    #[test_case("3,5-7,12", 13, false)]
    fn parses_and_membership_tests_match(expr: &str, layer: u32, expected: bool) {
        let set = SkipSet::parse(expr).unwrap();
        assert_eq!(set.contains(LayerIndex(layer)), expected);
    }

    #[test]
    fn empty_expression_skips_nothing() {
        let set = SkipSet::parse("").unwrap();
        assert!(set.is_empty());
        assert!(!set.contains(LayerIndex(0)));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(SkipSet::parse("7-5").is_err());
    }

    #[test]
    fn garbage_term_is_rejected() {
        assert!(SkipSet::parse("abc").is_err());
    }
}
