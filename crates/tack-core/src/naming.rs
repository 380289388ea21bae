//! Naming helpers for path segments
//!
//! Record type names arrive namespaced with `::` (`App::Models::User`);
//! path tags want them lowercased, underscored and pluralized.

use inflector::Inflector;

const NAMESPACE_SEPARATOR: &str = "::";

/// Singular -> plural pairs `Inflector` gets wrong
const IRREGULARS: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("child", "children"),
    ("mouse", "mice"),
    ("louse", "lice"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("foot", "feet"),
    ("ox", "oxen"),
];

/// Underscores every namespace segment and joins them with `/`.
///
/// `App::Models::UserProfile` becomes `app/models/user_profile`.
pub fn underscore(name: &str) -> String {
    name.split(NAMESPACE_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_snake_case())
        .collect::<Vec<_>>()
        .join("/")
}

/// Strips the namespace, keeping the last segment only.
pub fn demodulize(name: &str) -> &str {
    name.rsplit(NAMESPACE_SEPARATOR).next().unwrap_or(name)
}

/// Pluralizes the last word of `word`, leaving any leading path intact.
pub fn pluralize(word: &str) -> String {
    match word.rsplit_once('/') {
        Some((head, last)) => format!("{}/{}", head, pluralize(last)),
        None if word.is_empty() => String::new(),
        None => pluralize_word(word),
    }
}

/// Checks the last `_` word against [`IRREGULARS`] before asking `Inflector`.
fn pluralize_word(word: &str) -> String {
    let (head, last) = match word.rsplit_once('_') {
        Some((head, last)) => (Some(head), last),
        None => (None, word),
    };
    if IRREGULARS.iter().any(|(_, plural)| *plural == last) {
        return word.to_string();
    }
    match IRREGULARS.iter().find(|(singular, _)| *singular == last) {
        Some((_, plural)) => match head {
            Some(head) => format!("{}_{}", head, plural),
            None => plural.to_string(),
        },
        None => word.to_plural(),
    }
}

/// Namespaced, underscored plural: `App::Models::User` → `app/models/users`
pub fn table_name(name: &str) -> String {
    pluralize(&underscore(name))
}

/// Namespace-free, underscored plural: `App::Models::User` → `users`
pub fn short_table_name(name: &str) -> String {
    pluralize(&underscore(demodulize(name)))
}
