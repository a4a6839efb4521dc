//! Recognizer class vocabulary and composite number validity.

use std::collections::HashSet;

/// Labels the number recognizer was trained on.
pub const DEFAULT_CLASSES: [&str; 31] = [
    "01", "010", "011", "012", "013", "014", "015", "016", "017", "018", "019", "02", "020", "021",
    "03", "030", "035", "04", "040", "05", "050", "06", "060", "07", "070", "08", "080", "085",
    "09", "094", "125",
];

const MIN_LEN: usize = 2;
const MAX_LEN: usize = 5;

#[derive(Debug, Clone)]
pub struct NumberVocabulary {
    classes: Vec<String>,
    lookup: HashSet<String>,
    strict: bool,
}

impl NumberVocabulary {
    pub fn new<I, S>(classes: I, strict: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes: Vec<String> = classes.into_iter().map(Into::into).collect();
        let lookup = classes.iter().cloned().collect();
        Self {
            classes,
            lookup,
            strict,
        }
    }

    pub fn with_default_classes(strict: bool) -> Self {
        Self::new(DEFAULT_CLASSES, strict)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_known_label(&self, label: &str) -> bool {
        self.lookup.contains(label)
    }

    /// Digits only, 2 to 5 characters.
    pub fn has_number_shape(numero: &str) -> bool {
        let len = numero.chars().count();
        (MIN_LEN..=MAX_LEN).contains(&len) && numero.chars().all(|c| c.is_ascii_digit())
    }

    /// Whether a composite read from `fragments` is a plausible number.
    ///
    /// The composite itself only needs the number shape; in strict mode every
    /// fragment must also be a known label.
    pub fn is_valid_composite<S: AsRef<str>>(&self, numero: &str, fragments: &[S]) -> bool {
        if !Self::has_number_shape(numero) {
            return false;
        }
        !self.strict
            || (!fragments.is_empty() && fragments.iter().all(|f| self.is_known_label(f.as_ref())))
    }
}

impl Default for NumberVocabulary {
    fn default() -> Self {
        Self::with_default_classes(true)
    }
}
