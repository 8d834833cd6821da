use std::collections::HashSet;

use super::{Feature, FeatureLicensing};

/// A fixed licensing policy.
#[derive(Clone, Debug, Default)]
pub struct StaticLicensing {
    unlicensed: HashSet<Feature>,
}

impl StaticLicensing {
    /// Creates a policy that licenses every feature.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a policy that licenses every feature except the given ones.
    pub fn all_except<I>(unlicensed: I) -> Self
    where
        I: IntoIterator<Item = Feature>,
    {
        Self {
            unlicensed: unlicensed.into_iter().collect(),
        }
    }
}

impl FeatureLicensing for StaticLicensing {
    fn is_licensed(&self, feature: Feature) -> bool {
        !self.unlicensed.contains(&feature)
    }
}
