/// Markers that together identify bookkeeping tags such as `bad_id` and
/// `bad_pixiv_id`.
pub const DEFAULT_NOISE_MARKERS: [&str; 2] = ["bad", "id"];

/// Drops tags whose name contains every configured marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseFilter {
    markers: Vec<String>,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_MARKERS)
    }
}

impl NoiseFilter {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|m: &String| !m.is_empty())
                .collect(),
        }
    }

    /// A filter that keeps every tag.
    pub fn none() -> Self {
        Self {
            markers: Vec::new(),
        }
    }

    /// An empty marker list never matches.
    pub fn is_noise(&self, tag_name: &str) -> bool {
        !self.markers.is_empty() && self.markers.iter().all(|m| tag_name.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_markers_require_both() {
        let filter = NoiseFilter::default();
        assert!(filter.is_noise("bad_id"));
        assert!(filter.is_noise("bad_pixiv_id"));
        assert!(!filter.is_noise("bad_anatomy"));
        assert!(!filter.is_noise("pixiv_id_1234"));
        assert!(!filter.is_noise("cat"));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        assert!(!NoiseFilter::none().is_noise("bad_id"));
        assert!(!NoiseFilter::new([""]).is_noise("anything"));
    }
}
