use serde::Serialize;

/// One output quality: immutable, shared read-only by every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenditionProfile {
    pub name: String,
    pub target_height: u32,
    /// Video bitrate in the transcoder's notation, e.g. `2500k`.
    pub target_bitrate: String,
    pub output_subpath: String,
}

impl RenditionProfile {
    pub fn new(name: &str, target_height: u32, target_bitrate: &str) -> Self {
        Self {
            name: name.to_string(),
            target_height,
            target_bitrate: target_bitrate.to_string(),
            output_subpath: name.to_string(),
        }
    }

    pub fn default_ladder() -> Vec<Self> {
        vec![
            Self::new("1080p", 1080, "5000k"),
            Self::new("720p", 720, "2500k"),
            Self::new("480p", 480, "1000k"),
            Self::new("360p", 360, "750k"),
        ]
    }

    /// Scale to the target height; `-2` keeps the aspect ratio with an even width.
    pub fn scale_filter(&self) -> String {
        format!("scale=-2:{}", self.target_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_is_ordered_highest_first() {
        let ladder = RenditionProfile::default_ladder();
        let heights: Vec<_> = ladder.iter().map(|p| p.target_height).collect();
        assert_eq!(heights, [1080, 720, 480, 360]);
        assert_eq!(ladder[1].target_bitrate, "2500k");
        assert_eq!(ladder[3].output_subpath, "360p");
    }

    #[test]
    fn scale_filter_preserves_aspect_ratio() {
        assert_eq!(RenditionProfile::new("720p", 720, "2500k").scale_filter(), "scale=-2:720");
    }
}
