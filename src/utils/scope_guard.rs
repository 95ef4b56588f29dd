/// Runs a closure when dropped, unless dismissed first.
pub struct ScopeGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }

    /// The cleanup already happened on the regular path.
    pub fn dismiss(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn runs_on_drop_unless_dismissed() {
        let ran = Cell::new(0);
        {
            let _guard = ScopeGuard::new(|| ran.set(ran.get() + 1));
        }
        assert_eq!(ran.get(), 1);

        ScopeGuard::new(|| ran.set(ran.get() + 1)).dismiss();
        assert_eq!(ran.get(), 1);
    }
}
