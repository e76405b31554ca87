//! Field-name similarity.
//!
//! Tiered, first tier that applies wins:
//!
//! | Tier | Condition | Score |
//! |------|-----------|-------|
//! | Exact | identical names | 100 |
//! | CaseInsensitive | identical ignoring case | 90 |
//! | Substring | one name contains the other (shorter ≥ 3 chars), or both split into the same number of tokens that pairwise contain each other | 75 |
//! | EditDistance | `100 * (1 - levenshtein / max_len)` on lowercased names, floored | 0-100 |
//!
//! Every tier compares both directions, so `score(a, b) == score(b, a)`.

use std::fmt;

use once_cell::sync::Lazy;
use rapidfuzz::distance::levenshtein;
use regex::Regex;

const EXACT: u8 = 100;
const CASE_INSENSITIVE: u8 = 90;
const SUBSTRING: u8 = 75;
const MIN_CONTAINED_LEN: usize = 3;

static TOKEN_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[_\-.\s]+").expect("token separator regex"));

/// Which tier produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    CaseInsensitive,
    Substring,
    EditDistance,
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchTier::Exact => "exact name match",
            MatchTier::CaseInsensitive => "case-insensitive name match",
            MatchTier::Substring => "name containment",
            MatchTier::EditDistance => "edit-distance similarity",
        })
    }
}

/// Similarity of two field names, 0-100.
pub fn score(a: &str, b: &str) -> u8 {
    score_with_tier(a, b).0
}

/// Similarity of two field names along with the tier that produced it.
pub fn score_with_tier(a: &str, b: &str) -> (u8, MatchTier) {
    if a == b {
        return (EXACT, MatchTier::Exact);
    }

    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if a_lower == b_lower {
        return (CASE_INSENSITIVE, MatchTier::CaseInsensitive);
    }

    if contains_either(&a_lower, &b_lower) || tokens_contain(&a_lower, &b_lower) {
        return (SUBSTRING, MatchTier::Substring);
    }

    (edit_similarity(&a_lower, &b_lower), MatchTier::EditDistance)
}

fn contains_either(a: &str, b: &str) -> bool {
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    shorter.chars().count() >= MIN_CONTAINED_LEN && longer.contains(shorter)
}

/// `cust_name` vs `customer_name`: same token count, each token pair equal
/// or contained.
fn tokens_contain(a: &str, b: &str) -> bool {
    let a_tokens: Vec<&str> = TOKEN_SEPARATORS.split(a).filter(|t| !t.is_empty()).collect();
    let b_tokens: Vec<&str> = TOKEN_SEPARATORS.split(b).filter(|t| !t.is_empty()).collect();

    a_tokens.len() >= 2
        && a_tokens.len() == b_tokens.len()
        && a_tokens
            .iter()
            .zip(&b_tokens)
            .all(|(x, y)| x == y || contains_either(x, y))
}

fn edit_similarity(a: &str, b: &str) -> u8 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return EXACT;
    }
    let distance = levenshtein::distance(a.chars(), b.chars()).min(max_len);
    (100 * (max_len - distance) / max_len) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_literal_pairs() {
        assert_eq!(score("name", "name"), 100);
        assert_eq!(score("name", "Name"), 90);
        assert_eq!(score("Name", "name"), 90);
        assert_eq!(score("cust_name", "customer_name"), 75);
        assert_eq!(score("customer_name", "cust_name"), 75);
        assert_eq!(score("abc", "xyz"), 0);
        assert_eq!(score("xyz", "abc"), 0);
    }

    #[test]
    fn test_short_names_skip_substring_tier() {
        // "id" is too short to count as contained, so edit distance applies
        assert_eq!(score_with_tier("id", "identifier"), (20, MatchTier::EditDistance));
        assert_eq!(score_with_tier("identifier", "id"), (20, MatchTier::EditDistance));
    }

    #[test]
    fn test_substring_both_directions() {
        assert_eq!(score_with_tier("Email", "email_address"), (75, MatchTier::Substring));
        assert_eq!(score_with_tier("email_address", "Email"), (75, MatchTier::Substring));
    }

    #[test]
    fn test_edit_distance_floor() {
        // levenshtein("color", "colour") = 1, max len 6 -> floor(83.3)
        assert_eq!(score("color", "colour"), 83);
        assert_eq!(score("", ""), 100);
        assert_eq!(score("", "abc"), 0);
    }

    #[test]
    fn test_symmetry_sample() {
        let names = ["Name", "first_name", "FirstName", "zip", "zip_code", "postal", "e-mail", "mail"];
        for a in names {
            for b in names {
                assert_eq!(score(a, b), score(b, a), "{} / {}", a, b);
            }
        }
    }
}
