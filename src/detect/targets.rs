use std::collections::BTreeSet;

use crate::detect::result::Detection;

/// Classes the pipeline tracks and photographs by default.
pub const DEFAULT_TARGET_CLASSES: &[&str] = &[
    "person",
    "car",
    "truck",
    "bus",
    "motorcycle",
    "bicycle",
    "cat",
    "dog",
];

/// Allowlist of detection classes. An empty allowlist accepts every class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetClasses {
    classes: BTreeSet<String>,
}

impl TargetClasses {
    pub fn new<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes
                .into_iter()
                .map(|class| normalize_class(&class.into()))
                .filter(|class| !class.is_empty())
                .collect(),
        }
    }

    /// Accept every class.
    pub fn any() -> Self {
        Self {
            classes: BTreeSet::new(),
        }
    }

    pub fn accepts(&self, class_name: &str) -> bool {
        self.classes.is_empty() || self.classes.contains(&normalize_class(class_name))
    }

    /// Keep only detections of target classes, with class names normalised.
    pub fn filter(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .map(|mut det| {
                det.class_name = normalize_class(&det.class_name);
                det
            })
            .filter(|det| !det.class_name.is_empty() && self.accepts(&det.class_name))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(String::as_str)
    }
}

/// Trimmed lower-case class name; "Dog " and "dog" are the same class.
pub fn normalize_class(class_name: &str) -> String {
    class_name.trim().to_lowercase()
}

impl Default for TargetClasses {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_CLASSES.iter().copied())
    }
}
