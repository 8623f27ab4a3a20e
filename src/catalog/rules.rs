//! Artifact classification rules.
//!
//! Catalog titles are classified by an ordered table of name patterns:
//! first match wins, so specific component rules must sit above the generic
//! ones they would otherwise shadow (".NET cumulative" above "cumulative").
//! Unmatched titles fall through to `Optional`.

use super::UpdateClass;

/// Ordered rule table: any pattern hit (case-insensitive substring) assigns
/// the class.
const RULES: &[(&[&str], UpdateClass)] = &[
    (&["servicing stack"], UpdateClass::Ssu),
    (
        &["cumulative update for .net", "cumulative update for microsoft .net"],
        UpdateClass::DotNetCumulative,
    ),
    (&[".net framework"], UpdateClass::DotNet),
    (&["adobe flash player"], UpdateClass::AdobeUpdate),
    (&["cumulative update"], UpdateClass::Lcu),
    (&["dynamic update", "safe os"], UpdateClass::Dynamic),
];

/// Classify a catalog title. First matching rule wins.
pub fn classify(title: &str) -> UpdateClass {
    let lower = title.to_lowercase();
    for (patterns, class) in RULES {
        if patterns.iter().any(|p| lower.contains(p)) {
            return *class;
        }
    }
    UpdateClass::Optional
}
