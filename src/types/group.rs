//! Method groups: which requests may run alongside each other.
//!
//! A body declares its methods in named groups. Two requests are compatible
//! when they belong to the same self-compatible group, or when either of
//! their groups lists the other as compatible. A request without a group is
//! compatible with everything.

use core::fmt;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A named group of methods with its compatibility rules.
///
/// Groups are compared by name; cloning is cheap.
///
/// ```
/// use multiactive::types::MethodGroup;
///
/// let reads = MethodGroup::new("read", true);
/// let writes = MethodGroup::new("write", false).compatible_with("audit");
/// let audit = MethodGroup::new("audit", false);
///
/// assert!(reads.is_compatible(&reads));
/// assert!(!writes.is_compatible(&writes));
/// assert!(!reads.is_compatible(&writes));
/// assert!(audit.is_compatible(&writes));
/// ```
#[derive(Clone)]
pub struct MethodGroup {
    name: Arc<str>,
    self_compatible: bool,
    compatible_with: Arc<BTreeSet<Arc<str>>>,
}

impl MethodGroup {
    /// Creates a group. A self-compatible group lets its own requests run in
    /// parallel.
    #[must_use]
    pub fn new(name: impl AsRef<str>, self_compatible: bool) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            self_compatible,
            compatible_with: Arc::new(BTreeSet::new()),
        }
    }

    /// Declares the group named `other` compatible with this one.
    #[must_use]
    pub fn compatible_with(mut self, other: impl AsRef<str>) -> Self {
        Arc::make_mut(&mut self.compatible_with).insert(Arc::from(other.as_ref()));
        self
    }

    /// The group's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether requests of this group may run alongside each other.
    #[must_use]
    pub const fn is_self_compatible(&self) -> bool {
        self.self_compatible
    }

    /// Whether a request of this group may run alongside one of `other`.
    ///
    /// Symmetric: a rule declared on either side is enough.
    #[must_use]
    pub fn is_compatible(&self, other: &Self) -> bool {
        if self.name == other.name {
            return self.self_compatible && other.self_compatible;
        }
        self.compatible_with.contains(&other.name) || other.compatible_with.contains(&self.name)
    }
}

/// Compatibility of two optional memberships; no group means no constraint.
pub(crate) fn compatible(a: Option<&MethodGroup>, b: Option<&MethodGroup>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.is_compatible(b),
        _ => true,
    }
}

impl PartialEq for MethodGroup {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MethodGroup {}

impl fmt::Debug for MethodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodGroup({:?}", &*self.name)?;
        if self.self_compatible {
            f.write_str(", self")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for MethodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
