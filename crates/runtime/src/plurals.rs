//! CLDR plural-category selection
//!
//! Plural rules come from `intl_pluralrules` keyed by `unic-langid`
//! identifiers. Rule objects are memoized in a bounded, mutex-guarded
//! cache; `clear_all_caches` empties it for test harnesses. Selection runs
//! on the *string form* of the number so the visible fraction digits (the
//! CLDR `v` operand) survive: `"1.00"` and `"1"` can pick different
//! categories.

use intl_pluralrules::operands::PluralOperands;
use intl_pluralrules::{PluralRules, PluralCategory, PluralRuleType};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};
use unic_langid::LanguageIdentifier;

/// Upper bound on locale string length accepted by bundles
pub const MAX_LOCALE_LEN: usize = 64;

const RULE_CACHE_CAPACITY: usize = 64;

/// Locale grammar accepted by bundles: `[a-zA-Z0-9]+([_-][a-zA-Z0-9]+)*`,
/// length-bounded
pub fn is_valid_locale(locale: &str) -> bool {
    if locale.is_empty() || locale.len() > MAX_LOCALE_LEN {
        return false;
    }
    let mut prev_sep = true;
    for c in locale.chars() {
        if c == '-' || c == '_' {
            if prev_sep {
                return false;
            }
            prev_sep = true;
        } else if c.is_ascii_alphanumeric() {
            prev_sep = false;
        } else {
            return false;
        }
    }
    !prev_sep
}

fn rule_cache() -> &'static Mutex<LruCache<String, Arc<PluralRules>>> {
    static CACHE: OnceLock<Mutex<LruCache<String, Arc<PluralRules>>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(RULE_CACHE_CAPACITY).unwrap(),
        ))
    })
}

/// Drop all memoized locale data. Intended for test harnesses that want
/// deterministic cold-start behavior.
pub fn clear_all_caches() {
    if let Ok(mut cache) = rule_cache().lock() {
        cache.clear();
    }
}

fn rules_for(locale: &str) -> Arc<PluralRules> {
    if let Ok(mut cache) = rule_cache().lock() {
        if let Some(rules) = cache.get(locale) {
            return rules.clone();
        }
    }

    let langid: LanguageIdentifier = locale
        .replace('_', "-")
        .parse()
        .unwrap_or_else(|_| LanguageIdentifier::default());
    let rules = PluralRules::create(langid, PluralRuleType::CARDINAL).unwrap_or_else(|_| {
        tracing::debug!(locale, "no cardinal plural rules; falling back to en");
        let en: LanguageIdentifier = "en".parse().expect("en is a valid langid");
        PluralRules::create(en, PluralRuleType::CARDINAL)
            .expect("en cardinal rules are always available")
    });
    let rules = Arc::new(rules);

    if let Ok(mut cache) = rule_cache().lock() {
        cache.put(locale.to_string(), rules.clone());
    }
    rules
}

/// Select the plural category for a number's string form in a locale.
///
/// Falls back to `OTHER` when the form does not parse as plural operands.
pub fn plural_category(locale: &str, plural_form: &str) -> PluralCategory {
    let rules = rules_for(locale);
    match PluralOperands::try_from(plural_form) {
        Ok(operands) => rules.select(operands).unwrap_or(PluralCategory::OTHER),
        Err(_) => PluralCategory::OTHER,
    }
}

/// The variant-key spelling of a category
pub fn category_name(category: PluralCategory) -> &'static str {
    match category {
        PluralCategory::ZERO => "zero",
        PluralCategory::ONE => "one",
        PluralCategory::TWO => "two",
        PluralCategory::FEW => "few",
        PluralCategory::MANY => "many",
        PluralCategory::OTHER => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_grammar() {
        assert!(is_valid_locale("en"));
        assert!(is_valid_locale("en-US"));
        assert!(is_valid_locale("sr_Cyrl_RS"));
        assert!(is_valid_locale("zh-Hant-TW"));
        assert!(!is_valid_locale(""));
        assert!(!is_valid_locale("-en"));
        assert!(!is_valid_locale("en-"));
        assert!(!is_valid_locale("en--US"));
        assert!(!is_valid_locale("en US"));
        assert!(!is_valid_locale(&"x".repeat(MAX_LOCALE_LEN + 1)));
    }

    #[test]
    fn test_english_cardinals() {
        assert_eq!(plural_category("en", "1"), PluralCategory::ONE);
        assert_eq!(plural_category("en", "2"), PluralCategory::OTHER);
        assert_eq!(plural_category("en", "0"), PluralCategory::OTHER);
    }

    #[test]
    fn test_visible_fraction_digits_matter() {
        // English: `v != 0` forces OTHER even when the value is 1.
        assert_eq!(plural_category("en", "1.00"), PluralCategory::OTHER);
        assert_eq!(plural_category("en", "1.0"), PluralCategory::OTHER);
        assert_eq!(plural_category("en", "1"), PluralCategory::ONE);
    }

    #[test]
    fn test_polish_many() {
        assert_eq!(plural_category("pl", "5"), PluralCategory::MANY);
        assert_eq!(plural_category("pl", "2"), PluralCategory::FEW);
        assert_eq!(plural_category("pl", "1"), PluralCategory::ONE);
    }

    #[test]
    fn test_unknown_locale_falls_back() {
        assert_eq!(plural_category("zz-ZZ", "1"), PluralCategory::ONE);
    }

    #[test]
    fn test_underscore_separator_accepted() {
        assert_eq!(plural_category("en_US", "1"), PluralCategory::ONE);
    }

    #[test]
    fn test_clear_all_caches() {
        let _ = plural_category("en", "1");
        clear_all_caches();
        assert_eq!(plural_category("en", "1"), PluralCategory::ONE);
    }
}
