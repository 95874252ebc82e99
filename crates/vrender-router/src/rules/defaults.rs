//! Built-in fallback rules.

use vrender_models::{FallbackAction, MediaMetadataProfile};

use super::FallbackRule;

/// Codecs that many render backends decode slowly or not at all.
const HEAVY_CODECS: &[&str] = &["h265", "hevc", "av1"];

/// The default rule set, highest priority first.
pub fn default_rules() -> Vec<FallbackRule> {
    vec![
        FallbackRule::new(
            "size-over-100mb",
            "Oversized media",
            FallbackAction::Placeholder,
            100,
            |p: &MediaMetadataProfile| p.size_mb() > 100.0,
        )
        .with_rationale("Media larger than 100MB is too large to render reliably; substitute a placeholder"),
        FallbackRule::new(
            "resolution-over-1440p",
            "Resolution above 1440p",
            FallbackAction::Placeholder,
            90,
            |p: &MediaMetadataProfile| p.width > 2560 || p.height > 1440,
        )
        .with_rationale("Resolution above 2560x1440 exceeds what render workers decode in time"),
        FallbackRule::new(
            "bitrate-over-10mbps",
            "Bitrate above 10 Mbps",
            FallbackAction::Placeholder,
            85,
            |p: &MediaMetadataProfile| p.bitrate_kbps > 10_000,
        )
        .with_rationale("Bitrate above 10000kbps stalls decoding; substitute a placeholder"),
        FallbackRule::new(
            "duration-over-5min",
            "Duration above 5 minutes",
            FallbackAction::Placeholder,
            80,
            |p: &MediaMetadataProfile| p.duration_seconds > 300.0,
        )
        .with_rationale("Media longer than 5 minutes is replaced by a placeholder"),
        FallbackRule::new(
            "codec-heavy",
            "Expensive codec",
            FallbackAction::Compress,
            75,
            |p: &MediaMetadataProfile| HEAVY_CODECS.contains(&p.codec.as_str()),
        )
        .with_rationale("HEVC/AV1 media is re-encoded to H.264 before rendering"),
        FallbackRule::new(
            "size-50-100mb",
            "Large media",
            FallbackAction::Compress,
            70,
            |p: &MediaMetadataProfile| {
                let mb = p.size_mb();
                mb > 50.0 && mb <= 100.0
            },
        )
        .with_rationale("Media between 50MB and 100MB is compressed before rendering"),
        FallbackRule::new(
            "resolution-over-1080p",
            "Resolution above 1080p",
            FallbackAction::Resize,
            60,
            |p: &MediaMetadataProfile| {
                (p.width > 1920 && p.width <= 2560) || (p.height > 1080 && p.height <= 1440)
            },
        )
        .with_rationale("Resolution above 1920x1080 is downscaled to 1080p"),
        FallbackRule::new(
            "size-20-50mb-long",
            "Medium long-form media",
            FallbackAction::Compress,
            50,
            |p: &MediaMetadataProfile| {
                let mb = p.size_mb();
                mb > 20.0 && mb <= 50.0 && p.duration_seconds > 60.0
            },
        )
        .with_rationale("Long-form media between 20MB and 50MB is compressed"),
        FallbackRule::new(
            "bitrate-5-10mbps",
            "Elevated bitrate",
            FallbackAction::Compress,
            40,
            |p: &MediaMetadataProfile| p.bitrate_kbps > 5_000 && p.bitrate_kbps <= 10_000,
        )
        .with_rationale("Bitrate between 5000kbps and 10000kbps is reduced by compression"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use vrender_models::BYTES_PER_MB;

    fn profile(size_mb: u64, duration: f64, width: u32, height: u32, kbps: u32, codec: &str) -> MediaMetadataProfile {
        MediaMetadataProfile::new(size_mb * BYTES_PER_MB, duration, width, height, kbps, codec)
    }

    fn matching(profile: &MediaMetadataProfile) -> Vec<String> {
        default_rules()
            .into_iter()
            .filter(|r| r.matches(profile))
            .map(|r| r.id)
            .collect()
    }

    #[test]
    fn test_default_rule_ids_unique_and_sorted() {
        let rules = default_rules();
        let ids: HashSet<_> = rules.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), rules.len());
        assert!(rules.windows(2).all(|w| w[0].priority > w[1].priority));
    }

    #[test]
    fn test_codec_rule() {
        assert_eq!(matching(&profile(5, 10.0, 1280, 720, 2000, "HEVC")), vec!["codec-heavy"]);
        assert!(matching(&profile(5, 10.0, 1280, 720, 2000, "h264")).is_empty());
    }

    #[test]
    fn test_resolution_bands_are_exclusive() {
        assert_eq!(
            matching(&profile(5, 10.0, 2560, 1440, 2000, "h264")),
            vec!["resolution-over-1080p"]
        );
        assert_eq!(
            matching(&profile(5, 10.0, 3840, 2160, 2000, "h264")),
            vec!["resolution-over-1440p"]
        );
    }

    #[test]
    fn test_medium_size_rule_requires_long_form() {
        assert!(matching(&profile(30, 20.0, 1920, 1080, 4000, "h264")).is_empty());
        assert_eq!(
            matching(&profile(30, 90.0, 1920, 1080, 2800, "h264")),
            vec!["size-20-50mb-long"]
        );
    }
}
