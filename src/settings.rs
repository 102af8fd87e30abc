//! Pipeline settings.
//!
//! A `Flags` value is immutable once constructed and is consulted by the
//! `Context` when deciding which optimizations to run. Construct one through
//! the `builder()` so defaults stay in one place.

/// Number of 64-bit lanes in a 256-bit vector register, and therefore the
/// default strip-mining unroll factor.
pub const DEFAULT_UNROLL_FACTOR: u32 = 4;

/// Settings that control the compilation pipeline.
#[derive(Clone, Debug)]
pub struct Flags {
    enable_vectorizer: bool,
    unroll_factor: u32,
}

impl Flags {
    /// Create flags from a builder.
    pub fn new(builder: Builder) -> Self {
        Self {
            enable_vectorizer: builder.enable_vectorizer,
            unroll_factor: builder.unroll_factor,
        }
    }

    /// Is automatic loop vectorization enabled?
    pub fn enable_vectorizer(&self) -> bool {
        self.enable_vectorizer
    }

    /// Strip-mining unroll factor used by the vectorizer.
    pub fn unroll_factor(&self) -> u32 {
        self.unroll_factor
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new(builder())
    }
}

/// Create a flags builder with default settings.
pub fn builder() -> Builder {
    Builder {
        enable_vectorizer: false,
        unroll_factor: DEFAULT_UNROLL_FACTOR,
    }
}

/// Collects settings before freezing them into a `Flags`.
#[derive(Clone, Debug)]
pub struct Builder {
    enable_vectorizer: bool,
    unroll_factor: u32,
}

impl Builder {
    /// Enable or disable the loop vectorizer.
    pub fn enable_vectorizer(mut self, enable: bool) -> Self {
        self.enable_vectorizer = enable;
        self
    }

    /// Override the strip-mining unroll factor.
    pub fn unroll_factor(mut self, factor: u32) -> Self {
        debug_assert!(factor > 0);
        self.unroll_factor = factor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let flags = Flags::default();
        assert!(!flags.enable_vectorizer());
        assert_eq!(flags.unroll_factor(), DEFAULT_UNROLL_FACTOR);
    }

    #[test]
    fn builder_overrides() {
        let flags = Flags::new(builder().enable_vectorizer(true).unroll_factor(8));
        assert!(flags.enable_vectorizer());
        assert_eq!(flags.unroll_factor(), 8);
    }
}
