use serde::{Deserialize, Serialize};

/// A pure rule mapping one discriminator segment to a registered type name.
///
/// The registry tries its strategies in order for each segment, most-derived
/// segment first, and stops at the first name that is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameStrategy {
    /// The segment itself.
    Exact,
    /// The segment with `Deprecated.` inserted after its last `.`, so
    /// `Objects.Wall` finds a type moved to `Objects.Deprecated.Wall`.
    DeprecatedNamespace,
}

impl NameStrategy {
    pub const DEFAULT: [NameStrategy; 2] = [NameStrategy::Exact, NameStrategy::DeprecatedNamespace];

    pub fn candidate(&self, segment: &str) -> String {
        match self {
            Self::Exact => segment.to_string(),
            Self::DeprecatedNamespace => {
                let at = segment.rfind('.').map_or(0, |i| i + 1);
                let mut name = String::with_capacity(segment.len() + 11);
                name.push_str(&segment[..at]);
                name.push_str("Deprecated.");
                name.push_str(&segment[at..]);
                name
            }
        }
    }
}

/// A pure rule matching a stored member name against a declared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberNameStrategy {
    Exact,
    CaseInsensitive,
}

impl MemberNameStrategy {
    pub const DEFAULT: [MemberNameStrategy; 2] =
        [MemberNameStrategy::Exact, MemberNameStrategy::CaseInsensitive];

    pub fn matches(&self, declared: &str, stored: &str) -> bool {
        match self {
            Self::Exact => declared == stored,
            Self::CaseInsensitive => declared.eq_ignore_ascii_case(stored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_is_identity() {
        assert_eq!(NameStrategy::Exact.candidate("Objects.Wall"), "Objects.Wall");
    }

    #[test]
    fn deprecated_inserted_after_last_dot() {
        assert_eq!(
            NameStrategy::DeprecatedNamespace.candidate("Objects.BuiltElements.Wall"),
            "Objects.BuiltElements.Deprecated.Wall"
        );
    }

    #[test]
    fn deprecated_without_namespace() {
        assert_eq!(
            NameStrategy::DeprecatedNamespace.candidate("Wall"),
            "Deprecated.Wall"
        );
    }

    #[test]
    fn member_matching() {
        assert!(MemberNameStrategy::Exact.matches("Width", "Width"));
        assert!(!MemberNameStrategy::Exact.matches("Width", "width"));
        assert!(MemberNameStrategy::CaseInsensitive.matches("Width", "width"));
    }
}
