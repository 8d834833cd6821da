use serde::Deserialize;

use crate::{
    memory_allocator::{InterleavableDimmSetBuilder, DEFAULT_INTERLEAVE_BITMAPS},
    namespace::{Feature, StaticLicensing},
};

fn default_namespace_name_prefix() -> String {
    "NvDimmVol".to_string()
}

/// Planner configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct PlannerConfiguration {
    /// Prefix used when synthesizing a friendly name for a namespace created without one.
    ///
    /// Synthesized names are the prefix followed by a number one greater than the highest number already in use by a
    /// namespace with the same prefix.
    ///
    /// Defaults to `NvDimmVol`.
    #[serde(default = "default_namespace_name_prefix")]
    pub default_namespace_name_prefix: String,

    /// Namespace management features that are not licensed.
    ///
    /// Operations gated on one of these features fail with `NotSupported`.
    ///
    /// Defaults to an empty list, which licenses every feature.
    #[serde(default)]
    pub unlicensed_features: Vec<Feature>,

    /// Interleave bitmaps supported by the platform, in order of preference.
    ///
    /// Each bitmap has one bit set per channel that participates in the interleave. When unset, the table for a
    /// platform with six channels per socket is used.
    #[serde(default)]
    pub interleave_bitmaps: Option<Vec<u32>>,
}

impl PlannerConfiguration {
    /// Creates the licensing policy described by this configuration.
    pub fn licensing(&self) -> StaticLicensing {
        StaticLicensing::all_except(self.unlicensed_features.iter().copied())
    }

    /// Creates a Dimm set builder using the configured interleave bitmaps.
    pub fn dimm_set_builder(&self) -> InterleavableDimmSetBuilder {
        let bitmaps = self
            .interleave_bitmaps
            .clone()
            .unwrap_or_else(|| DEFAULT_INTERLEAVE_BITMAPS.to_vec());
        InterleavableDimmSetBuilder::with_interleave_bitmaps(bitmaps)
    }
}

impl Default for PlannerConfiguration {
    fn default() -> Self {
        Self {
            default_namespace_name_prefix: default_namespace_name_prefix(),
            unlicensed_features: Vec::new(),
            interleave_bitmaps: None,
        }
    }
}
