// ABOUTME: Deployment state marker types for the type state pattern.
// ABOUTME: Zero-sized types enforce valid phase order and rollback availability at compile time.

/// Configuration resolved, nothing checked or touched yet.
/// Available actions: `preflight()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolved;

/// Pre-flight passed and the deploy lock is held.
/// Available actions: `install_dependencies()`, `roll_back()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Checked;

/// Host requirements present.
/// Available actions: `execute()`, `roll_back()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Installed;

/// Every service activated.
/// Available actions: `verify_health()`, `roll_back()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Executed;

/// Health threshold met.
/// Available actions: `finish()`, `roll_back()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Verified;

/// Deployment record written; the run succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Completed;

/// Rollback log replayed after a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolledBack;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Checked {}
    impl Sealed for super::Installed {}
    impl Sealed for super::Executed {}
    impl Sealed for super::Verified {}
}

/// States reached after pre-flight, where the host may have been changed
/// and `roll_back()` is available.
pub trait Mutated: sealed::Sealed {}

impl Mutated for Checked {}
impl Mutated for Installed {}
impl Mutated for Executed {}
impl Mutated for Verified {}
