//! Crawl configuration
//!
//! Limits and switches for the heap graph crawl. The limits only matter for pathological or
//! corrupt captures; the defaults crawl everything a well-formed capture holds.

/// Configuration for the managed heap graph crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlConfig {
    /// Deepest nesting at which fields are still materialised (default: 350)
    /// Objects reached beyond it are kept with no fields and a depth-stopped state
    pub max_depth: u32,

    /// Decode array elements into field values
    /// When disabled, arrays are sized and cached but carry no elements
    pub decode_array_elements: bool,

    /// Maximum number of elements decoded per array (default: 1 << 20)
    /// Longer arrays are logged as a warning and counted in the crawl diagnostics
    pub max_array_elements: usize,

    /// Follow static field references after the GC roots
    pub crawl_static_fields: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 350,
            decode_array_elements: true,
            max_array_elements: 1 << 20,
            crawl_static_fields: true,
        }
    }
}

impl CrawlConfig {
    /// Crawls from GC handles only, ignoring static fields
    #[must_use]
    pub fn roots_only() -> Self {
        Self {
            crawl_static_fields: false,
            ..Self::default()
        }
    }

    /// Creates a cheap configuration for quick overviews
    ///
    /// Limits nesting and skips array elements entirely; leak detection still works for objects
    /// reached through fields, but anything only reachable through arrays is missed.
    #[must_use]
    pub fn shallow() -> Self {
        Self {
            max_depth: 32,
            decode_array_elements: false,
            max_array_elements: 0,
            crawl_static_fields: true,
        }
    }

    /// Returns this configuration with a different depth limit
    #[must_use]
    pub fn with_max_depth(self, max_depth: u32) -> Self {
        Self { max_depth, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let default = CrawlConfig::default();
        assert_eq!(default.max_depth, 350);
        assert!(default.decode_array_elements);
        assert!(default.crawl_static_fields);

        assert!(!CrawlConfig::roots_only().crawl_static_fields);
        assert_eq!(CrawlConfig::roots_only().max_depth, 350);

        let shallow = CrawlConfig::shallow();
        assert!(!shallow.decode_array_elements);
        assert_eq!(shallow.max_depth, 32);

        assert_eq!(CrawlConfig::default().with_max_depth(5).max_depth, 5);
    }
}
