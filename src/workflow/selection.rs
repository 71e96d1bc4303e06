//! Phase selection: which phases to include or skip.

use crate::error::KunError;

/// User-specified subset of phases, addressed by path (`addon/coredns`).
///
/// An empty inclusion list selects everything. Exclusion always wins over
/// inclusion and covers the whole subtree of the excluded phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Selection {
    /// Select every phase.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            include: normalize(include),
            exclude: normalize(exclude),
        }
    }

    #[must_use]
    pub fn include<S: AsRef<str>>(mut self, path: S) -> Self {
        self.include.extend(normalize([path]));
        self
    }

    #[must_use]
    pub fn exclude<S: AsRef<str>>(mut self, path: S) -> Self {
        self.exclude.extend(normalize([path]));
        self
    }

    pub fn included(&self) -> &[String] {
        &self.include
    }

    pub fn excluded(&self) -> &[String] {
        &self.exclude
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Every named path must exist in the tree.
    pub(crate) fn validate<S: AsRef<str>>(&self, known: &[S]) -> Result<(), KunError> {
        for path in self.include.iter().chain(&self.exclude) {
            if !known.iter().any(|k| k.as_ref() == path) {
                return Err(KunError::InvalidSelection(path.clone()));
            }
        }
        Ok(())
    }

    /// Whether this exact path is explicitly included, or no inclusion list
    /// was given.
    pub(crate) fn includes(&self, path: &str) -> bool {
        self.include.is_empty() || self.include.iter().any(|p| p == path)
    }

    pub(crate) fn excludes(&self, path: &str) -> bool {
        self.exclude.iter().any(|p| p == path)
    }
}

/// Trims whitespace and surrounding slashes. Empty entries are kept so that
/// `validate` rejects them.
fn normalize<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths
        .into_iter()
        .map(|p| p.as_ref().trim().trim_matches('/').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selection_includes_everything() {
        let sel = Selection::all();
        assert!(sel.is_empty());
        assert!(sel.includes("preflight"));
        assert!(!sel.excludes("preflight"));
    }

    #[test]
    fn test_normalizes_paths() {
        let sel = Selection::new([" /addon/coredns/ "], ["kubeconfig/"]);
        assert_eq!(sel.included(), ["addon/coredns"]);
        assert_eq!(sel.excluded(), ["kubeconfig"]);
    }

    #[test]
    fn test_explicit_include_is_exact_match() {
        let sel = Selection::all().include("addon");
        assert!(sel.includes("addon"));
        assert!(!sel.includes("addon/coredns"));
        assert!(!sel.includes("preflight"));
    }

    #[test]
    fn test_validate_rejects_unknown_paths() {
        let known = ["preflight", "addon", "addon/coredns"];
        assert!(Selection::all().include("addon/coredns").validate(&known).is_ok());
        let err = Selection::all()
            .exclude("addon/nope")
            .validate(&known)
            .unwrap_err();
        assert!(matches!(err, KunError::InvalidSelection(p) if p == "addon/nope"));
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let known = ["preflight", "addon", "addon/coredns"];
        for include in [vec![""], vec!["", ""], vec![" / "], vec!["addon", ""]] {
            let sel = Selection::new(include, Vec::<String>::new());
            assert!(!sel.is_empty());
            let err = sel.validate(&known).unwrap_err();
            assert!(matches!(err, KunError::InvalidSelection(ref p) if p.is_empty()));
        }
        let err = Selection::all().exclude("").validate(&known).unwrap_err();
        assert!(matches!(err, KunError::InvalidSelection(ref p) if p.is_empty()));
    }
}
