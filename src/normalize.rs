//! Canonical comparison keys for territorial names.
//!
//! The same function is applied to reference-dataset names and to query names,
//! so both sides of every lookup go through identical normalization:
//!
//! 1. trim and upper-case
//! 2. substitute known legacy/compound names from [`ALIASES`]
//! 3. fold accented vowels and `Ñ` to their plain letters
//! 4. collapse internal whitespace runs to a single space
//!
//! Alias keys are stored already folded and collapsed, so the substitution in
//! step 2 also catches spellings that differ from the table only in accents or
//! spacing. That keeps `normalize(normalize(x)) == normalize(x)`.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// Legacy and compound municipality names with their canonical form.
pub const ALIASES: &[(&str, &str)] = &[
    ("SAN SEBASTIÁN DE MARIQUITA", "MARIQUITA"),
    ("SAN SEBASTIAN DE MARIQUITA", "MARIQUITA"),
    ("ARMERO (GUAYABAL)", "ARMERO GUAYABAL"),
    ("CARMEN DE APICALÁ", "CARMEN DE APICALA"),
];

static ALIAS_TABLE: Lazy<FxHashMap<String, String>> = Lazy::new(|| {
    ALIASES
        .iter()
        .map(|(from, to)| (fold_and_collapse(from), fold_and_collapse(to)))
        .collect()
});

/// Returns the comparison key for `raw`, or `None` when nothing is left after trimming.
pub fn normalize(raw: &str) -> Option<String> {
    let upper = raw.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }

    let key = fold_and_collapse(&upper);
    if key.is_empty() {
        return None;
    }

    match ALIAS_TABLE.get(&key) {
        Some(canonical) => Some(canonical.clone()),
        None => Some(key),
    }
}

/// Convenience for optional columns: `None` and blank strings both yield `None`.
pub fn normalize_opt(raw: Option<&str>) -> Option<String> {
    raw.and_then(normalize)
}

fn fold_and_collapse(s: &str) -> String {
    s.split_whitespace()
        .map(|word| word.chars().filter_map(fold_char).collect::<String>())
        // a word made only of combining marks folds to nothing
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold_char(c: char) -> Option<char> {
    let folded = match c {
        'Á' | 'À' | 'Â' | 'Ä' => 'A',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'Ó' | 'Ò' | 'Ô' | 'Ö' => 'O',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'Ñ' => 'N',
        // combining diacritics left over from decomposed input
        '\u{0300}'..='\u{036F}' => return None,
        other => other,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_normalize_to_none() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("   \t\n"), None);
        assert_eq!(normalize_opt(None), None);
        assert_eq!(normalize_opt(Some("  ")), None);
    }

    #[test]
    fn upper_cases_and_trims() {
        assert_eq!(normalize("  ibague  ").as_deref(), Some("IBAGUE"));
    }

    #[test]
    fn folds_accents() {
        assert_eq!(normalize("Ibagué").as_deref(), Some("IBAGUE"));
        assert_eq!(normalize("Natagaima Ñ").as_deref(), Some("NATAGAIMA N"));
        assert_eq!(normalize("ataco güéjar").as_deref(), Some("ATACO GUEJAR"));
    }

    #[test]
    fn folds_decomposed_accents() {
        assert_eq!(normalize("Ibague\u{301}").as_deref(), Some("IBAGUE"));
    }

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(
            normalize("San   Antonio\t de  Calarma").as_deref(),
            Some("SAN ANTONIO DE CALARMA")
        );
    }

    #[test]
    fn applies_alias_table() {
        assert_eq!(
            normalize("San Sebastián de Mariquita").as_deref(),
            Some("MARIQUITA")
        );
        assert_eq!(
            normalize("Armero (Guayabal)").as_deref(),
            Some("ARMERO GUAYABAL")
        );
    }

    #[test]
    fn alias_matches_despite_extra_spacing() {
        assert_eq!(
            normalize("SAN  SEBASTIAN DE   MARIQUITA").as_deref(),
            Some("MARIQUITA")
        );
    }

    #[test]
    fn every_alias_changes_its_input() {
        for (from, to) in ALIASES {
            assert_ne!(fold_and_collapse(from), fold_and_collapse(to), "no-op alias {:?}", from);
        }
    }

    #[test]
    fn alias_targets_are_fixed_points() {
        for (_, target) in ALIASES {
            let once = normalize(target).unwrap();
            assert_eq!(normalize(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "Ibagué",
            "  san  sebastián de mariquita ",
            "Armero (Guayabal)",
            "La Esperanza",
            "ESPINAL\u{301}",
            "x \u{301} y",
            "Straße",
            "ZZZNOPLACE",
        ];
        for s in samples {
            let once = normalize(s);
            let twice = once.as_deref().and_then(normalize);
            assert_eq!(once, twice, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn lone_combining_mark_is_empty() {
        assert_eq!(normalize("\u{301}"), None);
        assert_eq!(normalize("a \u{301} b").as_deref(), Some("A B"));
    }
}
