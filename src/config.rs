//! Runtime configuration
//!
//! Defaults can be overridden from the environment:
//! - `SHADER_DISPATCH_DEVICE`: platform name to select when none is given
//! - `SHADER_DISPATCH_BUILD_OPTIONS`: extra options passed to the build step
//! - `SHADER_DISPATCH_FAST_MATH=1`: enable relaxed floating-point options
//! - `SHADER_DISPATCH_SHARED_CONTEXT=0`: give every compute shader its own context

/// How compute shaders obtain their context and command queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextSharing {
    /// One context and queue for the whole runtime, created on first use
    #[default]
    Process,
    /// A fresh context and queue per compute shader
    PerInstance,
}

/// Runtime settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Platform to select when the caller does not name one
    pub device: Option<String>,
    /// Options passed verbatim to the build step
    pub build_options: String,
    /// Append [`RuntimeConfig::FAST_MATH_OPTIONS`] to the build options
    pub fast_math: bool,
    pub context_sharing: ContextSharing,
}

impl RuntimeConfig {
    pub const FAST_MATH_OPTIONS: &'static str =
        "-cl-fast-relaxed-math -cl-mad-enable -cl-unsafe-math-optimizations";

    /// Reads overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(device) = lookup("SHADER_DISPATCH_DEVICE")
            && !device.trim().is_empty()
        {
            config.device = Some(device.trim().to_string());
        }
        if let Some(options) = lookup("SHADER_DISPATCH_BUILD_OPTIONS") {
            config.build_options = options;
        }
        config.fast_math = lookup("SHADER_DISPATCH_FAST_MATH")
            .map(|v| v == "1")
            .unwrap_or(false);
        if lookup("SHADER_DISPATCH_SHARED_CONTEXT").is_some_and(|v| v == "0") {
            config.context_sharing = ContextSharing::PerInstance;
        }
        config
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = options.into();
        self
    }

    pub fn with_fast_math(mut self, enabled: bool) -> Self {
        self.fast_math = enabled;
        self
    }

    pub fn with_context_sharing(mut self, sharing: ContextSharing) -> Self {
        self.context_sharing = sharing;
        self
    }

    /// Full option string handed to the driver's build step
    pub fn effective_build_options(&self) -> String {
        let base = self.build_options.trim();
        match (base.is_empty(), self.fast_math) {
            (true, false) => String::new(),
            (false, false) => base.to_string(),
            (true, true) => Self::FAST_MATH_OPTIONS.to_string(),
            (false, true) => format!("{} {}", base, Self::FAST_MATH_OPTIONS),
        }
    }
}
