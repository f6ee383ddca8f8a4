/// Runs a closure when dropped, whether the scope exits normally or unwinds.
///
/// Used to restore state flags (e.g. "currently polling", "reactor running")
/// that must not stay set after a panic escapes the guarded section.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    // Taken on drop so the closure runs at most once.
    closure: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}
