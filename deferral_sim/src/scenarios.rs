//! Named reference configurations.

use crate::config::SimConfig;

/// Preset identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// One partition, one key: every transaction runs back to back
    SerialHotspot,

    /// Keyspace far larger than the number of arrivals
    SparseKeys,

    /// Blocked arrivals are dropped on the spot
    ZeroDefer,

    /// Ten partitions over ten keys with a short defer cap
    DensePartitions,

    /// Same load as `DensePartitions` spread over a thousand keys
    WideKeyspace,
}

impl Preset {
    /// Returns a list of all presets.
    pub fn all() -> Vec<Preset> {
        vec![
            Preset::SerialHotspot,
            Preset::SparseKeys,
            Preset::ZeroDefer,
            Preset::DensePartitions,
            Preset::WideKeyspace,
        ]
    }

    /// Returns the preset name.
    pub fn name(&self) -> &'static str {
        match self {
            Preset::SerialHotspot => "serial_hotspot",
            Preset::SparseKeys => "sparse_keys",
            Preset::ZeroDefer => "zero_defer",
            Preset::DensePartitions => "dense_partitions",
            Preset::WideKeyspace => "wide_keyspace",
        }
    }

    /// Returns a description of the preset.
    pub fn description(&self) -> &'static str {
        match self {
            Preset::SerialHotspot => "1 partition, 1 key, 10 tps for 5s, uncapped: strictly serial execution",
            Preset::SparseKeys => "1M keys at 10 tps for 30s, uncapped: the rare collision waits instead of dropping",
            Preset::ZeroDefer => "1 partition, 5 keys, zero defer cap: blocked arrivals drop immediately",
            Preset::DensePartitions => "10 partitions, 10 keys, 0.5s defer cap: heavy contention",
            Preset::WideKeyspace => "10 partitions, 1000 keys, 0.5s defer cap: light contention",
        }
    }

    /// Returns the configuration of the preset (seed left unset).
    pub fn config(&self) -> SimConfig {
        let base = SimConfig::default();
        match self {
            Preset::SerialHotspot => base
                .with_partitions(1)
                .with_keyspace(1)
                .with_tps(10.0)
                .with_duration(5.0)
                .with_execution_time(1.0)
                .with_max_defer(None),
            Preset::SparseKeys => base
                .with_partitions(10)
                .with_keyspace(1_000_000)
                .with_tps(10.0)
                .with_duration(30.0)
                .with_max_defer(None),
            Preset::ZeroDefer => base
                .with_partitions(1)
                .with_keyspace(5)
                .with_tps(10.0)
                .with_duration(30.0)
                .with_max_defer(Some(0.0)),
            Preset::DensePartitions => base
                .with_partitions(10)
                .with_keyspace(10)
                .with_tps(20.0)
                .with_duration(20.0)
                .with_execution_time(0.5)
                .with_max_defer(Some(0.5)),
            Preset::WideKeyspace => base
                .with_partitions(10)
                .with_keyspace(1000)
                .with_tps(20.0)
                .with_duration(20.0)
                .with_execution_time(0.5)
                .with_max_defer(Some(0.5)),
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "serial_hotspot" | "serial" => Ok(Preset::SerialHotspot),
            "sparse_keys" | "sparse" => Ok(Preset::SparseKeys),
            "zero_defer" => Ok(Preset::ZeroDefer),
            "dense_partitions" | "dense" => Ok(Preset::DensePartitions),
            "wide_keyspace" | "wide" => Ok(Preset::WideKeyspace),
            _ => Err(format!("Unknown preset: {}", s)),
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for preset in Preset::all() {
            assert!(preset.config().validate().is_ok(), "{} should validate", preset);
        }
    }

    #[test]
    fn test_only_zero_defer_drops_on_arrival() {
        for preset in Preset::all() {
            let zero_cap = preset.config().max_defer_time_secs == Some(0.0);
            assert_eq!(zero_cap, preset == Preset::ZeroDefer, "{}", preset);
        }
    }

    #[test]
    fn test_parse_round_trip() {
        for preset in Preset::all() {
            assert_eq!(preset.name().parse::<Preset>().unwrap(), preset);
        }
        assert_eq!("Wide-Keyspace".parse::<Preset>().unwrap(), Preset::WideKeyspace);
        assert!("nope".parse::<Preset>().is_err());
    }

    #[test]
    fn test_dense_and_wide_differ_only_in_keyspace() {
        let dense = Preset::DensePartitions.config();
        let wide = Preset::WideKeyspace.config();

        assert_eq!(dense.clone().with_keyspace(1000), wide);
        assert_ne!(dense.keyspace_size, wide.keyspace_size);
    }
}
