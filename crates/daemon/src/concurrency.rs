//! Accelerator quota planning
//!
//! Derives per-vendor encoder ceilings from configuration and tracks how many
//! live jobs currently hold each vendor's encoder.

use crate::config::QuotaConfig;
use crate::gpu::Vendor;
use serde::{Deserialize, Serialize};

/// Concurrency ceilings per hardware vendor
///
/// Software encoding has no ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorQuotas {
    pub nvidia: u32,
    pub amd: u32,
    pub intel: u32,
}

impl VendorQuotas {
    /// Derive quotas from the `[quotas]` config section
    pub fn derive(cfg: &QuotaConfig) -> Self {
        Self {
            nvidia: cfg.nvidia,
            amd: cfg.amd,
            intel: cfg.intel,
        }
    }

    /// Ceiling for `vendor`, `None` when unlimited
    pub fn limit(&self, vendor: Vendor) -> Option<u32> {
        match vendor {
            Vendor::Cpu => None,
            Vendor::Nvidia => Some(self.nvidia),
            Vendor::Amd => Some(self.amd),
            Vendor::Intel => Some(self.intel),
        }
    }
}

impl Default for VendorQuotas {
    fn default() -> Self {
        Self::derive(&QuotaConfig::default())
    }
}

/// Point-in-time count of live jobs per encoder vendor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorUsage {
    pub cpu: u32,
    pub nvidia: u32,
    pub amd: u32,
    pub intel: u32,
}

impl VendorUsage {
    /// Count one job encoding on `vendor`
    pub fn record(&mut self, vendor: Vendor) {
        match vendor {
            Vendor::Cpu => self.cpu += 1,
            Vendor::Nvidia => self.nvidia += 1,
            Vendor::Amd => self.amd += 1,
            Vendor::Intel => self.intel += 1,
        }
    }

    pub fn count(&self, vendor: Vendor) -> u32 {
        match vendor {
            Vendor::Cpu => self.cpu,
            Vendor::Nvidia => self.nvidia,
            Vendor::Amd => self.amd,
            Vendor::Intel => self.intel,
        }
    }

    /// True while `vendor` is strictly below its ceiling
    pub fn has_capacity(&self, vendor: Vendor, quotas: &VendorQuotas) -> bool {
        match quotas.limit(vendor) {
            Some(limit) => self.count(vendor) < limit,
            None => true,
        }
    }
}

impl FromIterator<Vendor> for VendorUsage {
    fn from_iter<I: IntoIterator<Item = Vendor>>(iter: I) -> Self {
        let mut usage = VendorUsage::default();
        for vendor in iter {
            usage.record(vendor);
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vendor_strategy() -> impl Strategy<Value = Vendor> {
        prop_oneof![
            Just(Vendor::Cpu),
            Just(Vendor::Nvidia),
            Just(Vendor::Amd),
            Just(Vendor::Intel),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_usage_counts_match_input(
            vendors in proptest::collection::vec(vendor_strategy(), 0..40),
        ) {
            let usage: VendorUsage = vendors.iter().copied().collect();

            for vendor in [Vendor::Cpu, Vendor::Nvidia, Vendor::Amd, Vendor::Intel] {
                let expected = vendors.iter().filter(|v| **v == vendor).count() as u32;
                prop_assert_eq!(usage.count(vendor), expected);
            }
        }

        #[test]
        fn prop_capacity_is_strictly_below_limit(
            running in 0u32..10,
            limit in 0u32..10,
        ) {
            let quotas = VendorQuotas { nvidia: limit, amd: limit, intel: limit };
            let usage = VendorUsage { cpu: running, nvidia: running, amd: running, intel: running };

            prop_assert_eq!(usage.has_capacity(Vendor::Nvidia, &quotas), running < limit);
            prop_assert_eq!(usage.has_capacity(Vendor::Intel, &quotas), running < limit);
            prop_assert!(usage.has_capacity(Vendor::Cpu, &quotas));
        }
    }

    #[test]
    fn test_quotas_follow_config() {
        let quotas = VendorQuotas::derive(&QuotaConfig {
            nvidia: 5,
            amd: 0,
            intel: 2,
        });

        assert_eq!(quotas.limit(Vendor::Nvidia), Some(5));
        assert_eq!(quotas.limit(Vendor::Amd), Some(0));
        assert_eq!(quotas.limit(Vendor::Intel), Some(2));
        assert_eq!(quotas.limit(Vendor::Cpu), None);
    }
}
