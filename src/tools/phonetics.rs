//! Phonetic heuristics for names
//!
//! Rough hints only, not linguistically accurate. These seed the researcher
//! payload and the stub name cards.

const VOWELS: [char; 6] = ['a', 'e', 'i', 'o', 'u', 'y'];

/// Generate a rough IPA-style pronunciation hint for a name.
pub fn rough_ipa(name: &str) -> String {
    let lower = name.to_lowercase();
    let stem = |count: usize| -> &str {
        match name.char_indices().rev().nth(count - 1) {
            Some((idx, _)) => &name[..idx],
            None => "",
        }
    };

    // Common suffix patterns
    if lower.ends_with("ia") {
        return format!("/{}-ee-a/", stem(2));
    }
    if lower.ends_with("ie") || lower.ends_with("ee") {
        return format!("/{}-ee/", stem(2));
    }
    if lower.ends_with('y') {
        return format!("/{}-ee/", stem(1));
    }

    format!("/{}/", name)
}

/// Count syllables by counting contiguous vowel groups, adjusted for common
/// silent endings. Always at least 1.
pub fn count_syllables(name: &str) -> i64 {
    let lower = name.to_lowercase();
    let mut syllables: i64 = 0;
    let mut prev_was_vowel = false;

    for ch in lower.chars() {
        let is_vowel = VOWELS.contains(&ch);
        if is_vowel && !prev_was_vowel {
            syllables += 1;
        }
        prev_was_vowel = is_vowel;
    }

    // Silent 'e' at the end (Kate, Jane), but not a pronounced "ie" ending
    if lower.ends_with('e') && lower.chars().count() > 2 && !lower.ends_with("ie") {
        syllables = syllables.saturating_sub(1).max(1);
    }

    // Silent 'e' in 'es' / 'ed' endings (James)
    if lower.ends_with("es") && lower.chars().count() > 3 {
        syllables = syllables.saturating_sub(1).max(1);
    }
    if lower.ends_with("ed") && lower.chars().count() > 3 {
        syllables = syllables.saturating_sub(1).max(1);
    }

    syllables.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syllable_counts() {
        assert_eq!(count_syllables("Wren"), 1);
        assert_eq!(count_syllables("Kate"), 1);
        assert_eq!(count_syllables("James"), 1);
        assert_eq!(count_syllables("Iris"), 2);
        assert_eq!(count_syllables("Margot"), 2);
        assert_eq!(count_syllables("Eleanor"), 3);
        assert_eq!(count_syllables("Olivia"), 3);
    }

    #[test]
    fn test_syllables_never_below_one() {
        assert_eq!(count_syllables("B"), 1);
        assert_eq!(count_syllables(""), 1);
    }

    #[test]
    fn test_rough_ipa_suffixes() {
        assert_eq!(rough_ipa("Olivia"), "/Oliv-ee-a/");
        assert_eq!(rough_ipa("Sadie"), "/Sad-ee/");
        assert_eq!(rough_ipa("Renee"), "/Ren-ee/");
        assert_eq!(rough_ipa("Avery"), "/Aver-ee/");
        assert_eq!(rough_ipa("Wren"), "/Wren/");
    }
}
