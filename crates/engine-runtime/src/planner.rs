use connectors::source::SourceEstimate;
use engine_config::config::SplitSettings;
use tracing::info;

pub const SPLIT_MIN_MB: u32 = 128;
pub const SPLIT_MAX_MB: u32 = 1024;

const GIB: u64 = 1024 * 1024 * 1024;
const SMALL_TABLE: u64 = 50 * GIB;
const LARGE_TABLE: u64 = 200 * GIB;
const BIG_MEMORY_MB: u64 = 8 * 1024;

/// Chooses the source split granularity before partition enumeration.
///
/// Larger splits mean fewer partitions and cheaper planning, but a bigger
/// retry unit when one fails; the table below sits deliberately on the
/// conservative side whenever metadata is missing. An explicit override
/// short-circuits everything, and the result is always clamped to the hard
/// bounds.
pub fn plan_split_size(settings: &SplitSettings, estimate: SourceEstimate) -> u32 {
    if let Some(mb) = settings.override_mb {
        info!(split_mb = mb, "Split size forced by override");
        return clamp(mb);
    }
    if !settings.auto_determine {
        return clamp(settings.fallback_mb);
    }

    let Some(size) = estimate.table_size_bytes else {
        info!(
            fallback_mb = settings.fallback_mb,
            "Table size unknown; using fallback split size"
        );
        return clamp(settings.fallback_mb);
    };
    let skew = estimate.skew_ratio.unwrap_or(1.0);
    let big_memory = settings.executor_memory_mb >= BIG_MEMORY_MB;

    let split_mb = if skew > 2.0 {
        256
    } else if size < SMALL_TABLE || !big_memory {
        256
    } else if size <= LARGE_TABLE {
        if skew < 1.5 { 512 } else { 256 }
    } else if skew < 1.2 {
        1024
    } else if skew <= 1.5 {
        512
    } else {
        256
    };

    info!(
        split_mb,
        table_size_bytes = size,
        skew,
        big_memory,
        "Split size determined from source estimates"
    );
    clamp(split_mb)
}

fn clamp(mb: u32) -> u32 {
    mb.clamp(SPLIT_MIN_MB, SPLIT_MAX_MB)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SplitSettings {
        SplitSettings {
            auto_determine: true,
            override_mb: None,
            fallback_mb: 256,
            executor_memory_mb: 4 * 1024,
        }
    }

    fn estimate(size_gib: u64, skew: f64) -> SourceEstimate {
        SourceEstimate {
            table_size_bytes: Some(size_gib * GIB),
            skew_ratio: Some(skew),
        }
    }

    #[test]
    fn small_tables_always_get_256() {
        assert_eq!(plan_split_size(&settings(), estimate(10, 1.0)), 256);

        let mut big_mem = settings();
        big_mem.executor_memory_mb = 16 * 1024;
        assert_eq!(plan_split_size(&big_mem, estimate(49, 1.0)), 256);
    }

    #[test]
    fn medium_tables_need_memory_for_512() {
        let mut s = settings();
        assert_eq!(plan_split_size(&s, estimate(100, 1.0)), 256);

        s.executor_memory_mb = 8 * 1024;
        assert_eq!(plan_split_size(&s, estimate(100, 1.0)), 512);
        assert_eq!(plan_split_size(&s, estimate(100, 1.4)), 512);
        assert_eq!(plan_split_size(&s, estimate(100, 1.6)), 256);
    }

    #[test]
    fn large_tables_scale_with_skew() {
        let mut s = settings();
        s.executor_memory_mb = 16 * 1024;
        assert_eq!(plan_split_size(&s, estimate(500, 1.0)), 1024);
        assert_eq!(plan_split_size(&s, estimate(500, 1.3)), 512);
        assert_eq!(plan_split_size(&s, estimate(500, 1.8)), 256);

        s.executor_memory_mb = 4 * 1024;
        assert_eq!(plan_split_size(&s, estimate(500, 1.0)), 256);
    }

    #[test]
    fn heavy_skew_is_always_conservative() {
        let mut s = settings();
        s.executor_memory_mb = 64 * 1024;
        assert_eq!(plan_split_size(&s, estimate(500, 2.5)), 256);
    }

    #[test]
    fn unknown_skew_assumes_uniform() {
        let mut s = settings();
        s.executor_memory_mb = 16 * 1024;
        let est = SourceEstimate {
            table_size_bytes: Some(500 * GIB),
            skew_ratio: None,
        };
        assert_eq!(plan_split_size(&s, est), 1024);
    }

    #[test]
    fn unknown_size_uses_fallback() {
        let mut s = settings();
        s.fallback_mb = 512;
        assert_eq!(plan_split_size(&s, SourceEstimate::default()), 512);
    }

    #[test]
    fn override_short_circuits_but_is_clamped() {
        let mut s = settings();
        s.override_mb = Some(512);
        assert_eq!(plan_split_size(&s, estimate(10, 3.0)), 512);

        s.override_mb = Some(64);
        assert_eq!(plan_split_size(&s, SourceEstimate::default()), SPLIT_MIN_MB);
        s.override_mb = Some(4096);
        assert_eq!(plan_split_size(&s, SourceEstimate::default()), SPLIT_MAX_MB);
    }

    #[test]
    fn disabled_planner_uses_fallback() {
        let mut s = settings();
        s.auto_determine = false;
        s.fallback_mb = 1024;
        assert_eq!(plan_split_size(&s, estimate(500, 1.0)), 1024);
    }
}
