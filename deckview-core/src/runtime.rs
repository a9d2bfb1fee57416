use once_cell::sync::OnceCell;

/// Process-wide slot for an expensive runtime (the rasterization library
/// binding) that must be initialised at most once.
///
/// Concurrent callers block on whichever caller runs the initialiser first.
/// A failed initialisation leaves the slot empty so a later caller can retry.
pub struct RuntimeCell<R> {
    cell: OnceCell<R>,
}

impl<R> RuntimeCell<R> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub fn get_or_try_init<F, E>(&self, init: F) -> Result<&R, E>
    where
        F: FnOnce() -> Result<R, E>,
    {
        self.cell.get_or_try_init(|| {
            tracing::debug!("initialising shared rasterization runtime");
            init()
        })
    }
}

impl<R> Default for RuntimeCell<R> {
    fn default() -> Self {
        Self::new()
    }
}
