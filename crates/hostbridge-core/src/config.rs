//! Environment configuration.

/// Defaults used when rendering values for host tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InspectOptions {
    /// Emit ANSI colour sequences from `stylize`.
    pub colors: bool,
    /// Nesting depth after which objects render as `[Object]`.
    pub depth: u32,
}

impl InspectOptions {
    pub fn new() -> Self {
        Self {
            colors: false,
            depth: 2,
        }
    }

    pub fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings fixed at environment creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    max_objects: Option<usize>,
    gc_threshold: Option<usize>,
    inspect: InspectOptions,
}

impl EnvironmentConfig {
    pub fn new() -> Self {
        Self {
            max_objects: None,
            gc_threshold: None,
            inspect: InspectOptions::default(),
        }
    }

    /// Cap the number of live host objects. Allocation past the cap fails
    /// with `ResourceExhausted`.
    pub fn with_max_objects(mut self, limit: usize) -> Self {
        self.max_objects = Some(limit);
        self
    }

    /// Collect automatically once this many objects were allocated since the
    /// previous collection, checked when the outermost `enter` returns.
    pub fn with_gc_threshold(mut self, allocations: usize) -> Self {
        self.gc_threshold = Some(allocations);
        self
    }

    pub fn with_inspect_options(mut self, inspect: InspectOptions) -> Self {
        self.inspect = inspect;
        self
    }

    pub fn max_objects(&self) -> Option<usize> {
        self.max_objects
    }

    pub fn gc_threshold(&self) -> Option<usize> {
        self.gc_threshold
    }

    pub fn inspect(&self) -> InspectOptions {
        self.inspect
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EnvironmentConfig::default();
        assert_eq!(config.max_objects(), None);
        assert_eq!(config.gc_threshold(), None);
        assert!(!config.inspect().colors);
        assert_eq!(config.inspect().depth, 2);
    }

    #[test]
    fn builder_chain() {
        let config = EnvironmentConfig::new()
            .with_max_objects(64)
            .with_gc_threshold(16)
            .with_inspect_options(InspectOptions::new().with_colors(true).with_depth(4));
        assert_eq!(config.max_objects(), Some(64));
        assert_eq!(config.gc_threshold(), Some(16));
        assert_eq!(config.inspect(), InspectOptions { colors: true, depth: 4 });
    }
}
