//! Sibling ordering.
//!
//! Drives come first (case-insensitive alphabetical), then virtual items,
//! then filesystem entries. Within the last two groups names compare either
//! naturally (`file2` < `file10`) or ordinally, depending on [`SortPolicy`].
//! Ties are broken by the raw identifier so the order is total.

use crate::namespace::EntryKind;
use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// How display names of non-drive entries are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortPolicy {
    /// Digit runs compare by numeric value, letters case-insensitively.
    #[default]
    Natural,
    /// Case-insensitive character comparison.
    Ordinal,
}

/// The fields of an entry that determine its position.
#[derive(Debug, Clone, Copy)]
pub struct SortKey<'a> {
    /// Sort group.
    pub kind: EntryKind,
    /// Display name.
    pub display_name: &'a str,
    /// Raw identifier token, used as the tie breaker.
    pub id: &'a str,
}

/// Total order over sibling entries.
pub fn compare_keys(a: &SortKey<'_>, b: &SortKey<'_>, policy: SortPolicy) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| match (a.kind, policy) {
            (EntryKind::Drive, _) | (_, SortPolicy::Ordinal) => {
                ordinal_cmp(a.display_name, b.display_name)
            }
            (_, SortPolicy::Natural) => natural_cmp(a.display_name, b.display_name),
        })
        .then_with(|| a.id.cmp(b.id))
}

/// Case-insensitive comparison.
pub fn ordinal_cmp(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Case-insensitive comparison that orders embedded numbers by value.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_digits = take_digits(&mut left);
                let r_digits = take_digits(&mut right);
                let ordering = compare_numbers(&l_digits, &r_digits);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                let ordering = l.to_lowercase().cmp(r.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(kind: EntryKind, name: &'a str) -> SortKey<'a> {
        SortKey {
            kind,
            display_name: name,
            id: name,
        }
    }

    #[test]
    fn test_natural_orders_numbers_by_value() {
        assert_eq!(natural_cmp("file2", "file10"), Ordering::Less);
        assert_eq!(natural_cmp("File10", "file9"), Ordering::Greater);
        assert_eq!(natural_cmp("a007", "a7"), Ordering::Equal);
        assert_eq!(natural_cmp("abc", "ABD"), Ordering::Less);
        assert_eq!(natural_cmp("ab", "abc"), Ordering::Less);
    }

    #[test]
    fn test_ordinal_is_case_insensitive_lexical() {
        assert_eq!(ordinal_cmp("file2", "file10"), Ordering::Greater);
        assert_eq!(ordinal_cmp("Users", "users"), Ordering::Equal);
    }

    #[test]
    fn test_drives_then_virtual_then_filesystem() {
        let mut keys = vec![
            key(EntryKind::FileSystem, "Documents"),
            key(EntryKind::Virtual, "Control Panel"),
            key(EntryKind::Drive, "D:\\"),
            key(EntryKind::Drive, "c:\\"),
            key(EntryKind::FileSystem, "Desktop"),
        ];
        keys.sort_by(|a, b| compare_keys(a, b, SortPolicy::Natural));

        let names: Vec<_> = keys.iter().map(|k| k.display_name).collect();
        assert_eq!(
            names,
            vec!["c:\\", "D:\\", "Control Panel", "Desktop", "Documents"]
        );
    }

    #[test]
    fn test_ties_broken_by_identifier() {
        let a = SortKey {
            kind: EntryKind::FileSystem,
            display_name: "Same",
            id: "a",
        };
        let b = SortKey {
            kind: EntryKind::FileSystem,
            display_name: "same",
            id: "b",
        };
        assert_eq!(compare_keys(&a, &b, SortPolicy::Natural), Ordering::Less);
        assert_eq!(compare_keys(&b, &a, SortPolicy::Ordinal), Ordering::Greater);
    }
}
