//! Tunables of the virtual memory subsystem.

use keos::addressing::Va;

/// Configuration of the virtual memory subsystem.
///
/// Built once and handed to [`Vm::new`]. Every setter consumes and returns
/// the configuration, so a configuration reads as a chain:
///
/// ```
/// use keos::addressing::Va;
/// use keos_vm::VmConfig;
///
/// let config = VmConfig::new()
///     .with_stack_top(Va::new(0x4748_0000).unwrap())
///     .with_max_stack_size(0x10_0000);
/// assert_eq!(config.max_stack_size(), 0x10_0000);
/// ```
///
/// [`Vm::new`]: crate::Vm::new
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    stack_top: Va,
    max_stack_size: usize,
    stack_slack: usize,
    user_limit: Va,
}

impl VmConfig {
    /// Top of the user stack.
    pub const DEFAULT_STACK_TOP: usize = 0x4748_0000;
    /// The stack may grow up to 1 MiB.
    pub const DEFAULT_MAX_STACK_SIZE: usize = 0x10_0000;
    /// A `push` faults 8 bytes below the stack pointer before it moves.
    pub const DEFAULT_STACK_SLACK: usize = 8;
    /// End of the canonical lower half.
    pub const DEFAULT_USER_LIMIT: usize = 0x0000_8000_0000_0000;

    /// Creates the default configuration.
    pub const fn new() -> Self {
        Self {
            stack_top: match Va::new(Self::DEFAULT_STACK_TOP) {
                Some(va) => va,
                None => unreachable!(),
            },
            max_stack_size: Self::DEFAULT_MAX_STACK_SIZE,
            stack_slack: Self::DEFAULT_STACK_SLACK,
            user_limit: match Va::new(Self::DEFAULT_USER_LIMIT - 1) {
                Some(va) => va,
                None => unreachable!(),
            },
        }
    }

    /// Sets the top of the user stack, rounded down to a page boundary.
    pub fn with_stack_top(mut self, va: Va) -> Self {
        self.stack_top = va.page_down();
        self
    }

    /// Sets the maximum size of the user stack.
    pub fn with_max_stack_size(mut self, size: usize) -> Self {
        self.max_stack_size = size;
        self
    }

    /// Sets how far below the stack pointer a fault still grows the stack.
    pub fn with_stack_slack(mut self, slack: usize) -> Self {
        self.stack_slack = slack;
        self
    }

    /// Sets the highest user address (inclusive).
    pub fn with_user_limit(mut self, va: Va) -> Self {
        self.user_limit = va;
        self
    }

    /// Top of the user stack.
    #[inline]
    pub fn stack_top(&self) -> Va {
        self.stack_top
    }

    /// Maximum size of the user stack.
    #[inline]
    pub fn max_stack_size(&self) -> usize {
        self.max_stack_size
    }

    /// Distance below the stack pointer that still counts as a stack access.
    #[inline]
    pub fn stack_slack(&self) -> usize {
        self.stack_slack
    }

    /// Whether `va` is a user address.
    #[inline]
    pub fn is_user_va(&self, va: Va) -> bool {
        va <= self.user_limit
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VmConfig::default();
        assert_eq!(config.stack_top().into_usize(), 0x4748_0000);
        assert_eq!(config.max_stack_size(), 1 << 20);
        assert_eq!(config.stack_slack(), 8);
        assert!(config.is_user_va(Va::new(0x7fff_ffff_f000).unwrap()));
        assert!(!config.is_user_va(Va::new(0xffff_8000_0000_0000).unwrap()));
    }

    #[test]
    fn stack_top_is_page_aligned() {
        let config = VmConfig::new().with_stack_top(Va::new(0x1000_0123).unwrap());
        assert_eq!(config.stack_top().into_usize(), 0x1000_0000);
    }
}
