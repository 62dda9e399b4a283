/// How byte buffers are handed to the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryModel {
    /// Host and native code share one address space, buffers are exposed as zero-copy views.
    #[default]
    SharedAddressSpace,
    /// The host runs in a sandbox with its own relocatable memory, buffers are copied.
    Sandboxed,
}

/// Options for a bridge session.
#[derive(Clone, Debug)]
pub struct BridgeOptions {
    /// How byte buffers cross the boundary
    pub memory_model: MemoryModel,

    /// Maximum number of native exceptions remembered for identity recovery. Older entries are
    /// evicted first, after which their host errors degrade to message and type only.
    pub exception_capacity: usize,

    /// Prefix added to the message of every host error created from a native exception
    pub error_prefix: String,

    /// Number of entries at which a cache miss also prunes dead proxies
    pub prune_threshold: usize,
}

impl Default for BridgeOptions {
    /// Create a new options struct with default values.
    fn default() -> Self {
        BridgeOptionsBuilder::new().build()
    }
}

pub struct BridgeOptionsBuilder(BridgeOptions);

impl BridgeOptionsBuilder {
    /// Create new options with default values.
    pub fn new() -> Self {
        Self(BridgeOptions {
            memory_model: MemoryModel::default(),
            exception_capacity: 256,
            error_prefix: String::from("native: "),
            prune_threshold: 1024,
        })
    }

    /// Return the options that have been built, consuming the builder.
    pub fn build(self) -> BridgeOptions {
        self.0
    }

    pub fn memory_model(mut self, memory_model: MemoryModel) -> Self {
        self.0.memory_model = memory_model;
        self
    }

    pub fn exception_capacity(mut self, exception_capacity: usize) -> Self {
        self.0.exception_capacity = exception_capacity.max(1);
        self
    }

    pub fn error_prefix(mut self, error_prefix: impl Into<String>) -> Self {
        self.0.error_prefix = error_prefix.into();
        self
    }

    pub fn prune_threshold(mut self, prune_threshold: usize) -> Self {
        self.0.prune_threshold = prune_threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let options = BridgeOptionsBuilder::new()
            .memory_model(MemoryModel::Sandboxed)
            .exception_capacity(0)
            .error_prefix("C++: ")
            .build();

        assert_eq!(options.memory_model, MemoryModel::Sandboxed);
        assert_eq!(options.exception_capacity, 1);
        assert_eq!(options.error_prefix, "C++: ");
        assert_eq!(options.prune_threshold, 1024);
    }

    #[test]
    fn default_matches_builder() {
        let options = BridgeOptions::default();
        assert_eq!(options.memory_model, MemoryModel::SharedAddressSpace);
        assert_eq!(options.exception_capacity, 256);
        assert_eq!(options.error_prefix, "native: ");
    }
}
