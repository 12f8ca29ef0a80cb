//! Bounded-recursion primitives
//!
//! `DepthGuard` validates the limit *before* incrementing, so an error
//! path can never leave the counter corrupted. `ResolutionContext` pairs a
//! depth guard with the expansion budget that stops Billion-Laughs style
//! blowups. A thread-local global counter backs both: a user function that
//! re-enters the bundle gets a fresh per-call guard but shares the global
//! one, so reentry cannot reset the effective depth.

use std::cell::Cell;

/// Limit violations raised by the guards
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    #[error("nesting depth exceeds the limit of {max}")]
    TooDeep { max: usize },

    #[error("expansion exceeds the limit of {max} characters")]
    ExpansionExceeded { max: usize },

    #[error("reentrant formatting exceeds the limit of {max} nested calls")]
    ReentryLimit { max: usize },
}

/// Reusable bounded-depth counter
#[derive(Debug, Clone)]
pub struct DepthGuard {
    depth: usize,
    max_depth: usize,
}

impl DepthGuard {
    pub fn new(max_depth: usize) -> Self {
        DepthGuard { depth: 0, max_depth }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Enter one level. The check happens before the increment: on error
    /// the counter is untouched and needs no matching `exit`.
    pub fn enter(&mut self) -> Result<(), LimitError> {
        if self.depth >= self.max_depth {
            return Err(LimitError::TooDeep {
                max: self.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Leave one level; must pair with a successful `enter`
    pub fn exit(&mut self) {
        debug_assert!(self.depth > 0, "DepthGuard::exit without enter");
        self.depth = self.depth.saturating_sub(1);
    }

    /// Scope-manager form: the returned guard exits on drop
    pub fn scope(&mut self) -> Result<DepthScope<'_>, LimitError> {
        self.enter()?;
        Ok(DepthScope { guard: self })
    }
}

/// RAII handle produced by [`DepthGuard::scope`]
pub struct DepthScope<'a> {
    guard: &'a mut DepthGuard,
}

impl Drop for DepthScope<'_> {
    fn drop(&mut self) {
        self.guard.exit();
    }
}

/// Per-call resolution budgets: nesting depth plus total output size
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub depth: DepthGuard,
    written: usize,
    max_expansion: usize,
}

impl ResolutionContext {
    pub fn new(max_depth: usize, max_expansion: usize) -> Self {
        ResolutionContext {
            depth: DepthGuard::new(max_depth),
            written: 0,
            max_expansion,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Account for `chars` characters of output
    pub fn grow(&mut self, chars: usize) -> Result<(), LimitError> {
        let next = self.written.saturating_add(chars);
        if next > self.max_expansion {
            return Err(LimitError::ExpansionExceeded {
                max: self.max_expansion,
            });
        }
        self.written = next;
        Ok(())
    }
}

thread_local! {
    static GLOBAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// RAII guard for the task-local global depth counter.
///
/// Acquired once per formatting call; nested acquisitions (user functions
/// calling back into a bundle) stack up and hit `max` no matter how the
/// per-call guards are reset.
pub struct GlobalDepthGuard {
    _private: (),
}

impl GlobalDepthGuard {
    pub fn enter(max: usize) -> Result<Self, LimitError> {
        GLOBAL_DEPTH.with(|cell| {
            let current = cell.get();
            if current >= max {
                return Err(LimitError::ReentryLimit { max });
            }
            cell.set(current + 1);
            Ok(GlobalDepthGuard { _private: () })
        })
    }

    /// Current nesting of formatting calls on this thread
    pub fn current() -> usize {
        GLOBAL_DEPTH.with(|cell| cell.get())
    }
}

impl Drop for GlobalDepthGuard {
    fn drop(&mut self) {
        GLOBAL_DEPTH.with(|cell| cell.set(cell.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_exit() {
        let mut g = DepthGuard::new(2);
        g.enter().unwrap();
        g.enter().unwrap();
        assert_eq!(g.enter(), Err(LimitError::TooDeep { max: 2 }));
        assert_eq!(g.depth(), 2);
        g.exit();
        g.enter().unwrap();
        g.exit();
        g.exit();
        assert_eq!(g.depth(), 0);
    }

    #[test]
    fn test_error_leaves_depth_untouched() {
        let mut g = DepthGuard::new(1);
        g.enter().unwrap();
        assert!(g.enter().is_err());
        assert!(g.enter().is_err());
        assert_eq!(g.depth(), 1);
    }

    #[test]
    fn test_scope_semantics() {
        let mut g = DepthGuard::new(3);
        {
            let _s = g.scope().unwrap();
        }
        assert_eq!(g.depth(), 0);
        g.enter().unwrap();
        {
            let _s = g.scope().unwrap();
        }
        assert_eq!(g.depth(), 1);
    }

    #[test]
    fn test_expansion_budget() {
        let mut ctx = ResolutionContext::new(10, 10);
        ctx.grow(6).unwrap();
        ctx.grow(4).unwrap();
        assert_eq!(
            ctx.grow(1),
            Err(LimitError::ExpansionExceeded { max: 10 })
        );
        assert_eq!(ctx.written(), 10);
    }

    #[test]
    fn test_global_depth_stacks() {
        assert_eq!(GlobalDepthGuard::current(), 0);
        let a = GlobalDepthGuard::enter(2).unwrap();
        let _b = GlobalDepthGuard::enter(2).unwrap();
        assert!(GlobalDepthGuard::enter(2).is_err());
        assert_eq!(GlobalDepthGuard::current(), 2);
        drop(a);
        assert_eq!(GlobalDepthGuard::current(), 1);
        let _c = GlobalDepthGuard::enter(2).unwrap();
    }
}
