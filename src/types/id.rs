// ABOUTME: Distinct handle types for engine objects.
// ABOUTME: A container handle cannot be passed where a network handle is expected.

use std::fmt;

macro_rules! engine_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        #[must_use = "handles reference engine objects"]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

engine_handle!(
    /// Container id or name; engines accept either.
    ContainerId
);
engine_handle!(
    /// Network id or name.
    NetworkId
);
