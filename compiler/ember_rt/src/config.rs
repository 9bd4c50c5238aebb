//! Runtime configuration.

use crate::arena::DEFAULT_BLOCK_SIZE;

/// Settings shared by every thread attached to a runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Slots per block of each thread's local variable stack.
    pub local_block_size: usize,
    /// Slots per block of each thread's closure variable stack.
    pub closure_block_size: usize,
    /// Call chain depth limit; `None` for unlimited.
    pub max_call_depth: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            local_block_size: DEFAULT_BLOCK_SIZE,
            closure_block_size: DEFAULT_BLOCK_SIZE,
            max_call_depth: None,
        }
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }
}

/// Builder for [`RuntimeConfig`] and [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Block size of both variable stacks.
    #[must_use]
    pub fn block_size(mut self, slots: usize) -> Self {
        self.config.local_block_size = slots;
        self.config.closure_block_size = slots;
        self
    }

    #[must_use]
    pub fn local_block_size(mut self, slots: usize) -> Self {
        self.config.local_block_size = slots;
        self
    }

    #[must_use]
    pub fn closure_block_size(mut self, slots: usize) -> Self {
        self.config.closure_block_size = slots;
        self
    }

    #[must_use]
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.config.max_call_depth = Some(depth);
        self
    }

    /// Finish with just the configuration.
    pub fn config(self) -> RuntimeConfig {
        self.config
    }

    pub fn build(self) -> crate::Runtime {
        crate::Runtime::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.local_block_size, 128);
        assert_eq!(config.closure_block_size, 128);
        assert_eq!(config.max_call_depth, None);
    }

    #[test]
    fn builder_overrides() {
        let config = RuntimeConfig::builder()
            .block_size(16)
            .closure_block_size(4)
            .max_call_depth(64)
            .config();
        assert_eq!(
            config,
            RuntimeConfig {
                local_block_size: 16,
                closure_block_size: 4,
                max_call_depth: Some(64),
            }
        );
    }
}
