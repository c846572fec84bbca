use core::cell::{RefCell, RefMut};

/// Interior mutability for statics on a uniprocessor without preemption.
///
/// There is exactly one thread of control, so the borrow flag of the inner `RefCell`
/// is sufficient to detect re-entrant access from trap handlers. Trap entry may interrupt
/// a borrow holder and must use `try_access`. Paths that never return may take the
/// contents anyway with `force_access`.
pub struct UpCell<T> {
    inner: RefCell<T>,
}

impl<T> UpCell<T> {
    /// The caller must make sure that the value is only ever accessed from a single CPU.
    pub const unsafe fn new(value: T) -> Self {
        UpCell {
            inner: RefCell::new(value),
        }
    }

    /// Borrow the contents exclusively. Panics if they are already borrowed.
    pub fn exclusive_access(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// Borrow the contents exclusively unless somebody further down the stack already holds them.
    pub fn try_access(&self) -> Option<RefMut<'_, T>> {
        self.inner.try_borrow_mut().ok()
    }

    /// Access the contents ignoring the borrow flag.
    ///
    /// Only valid on terminal paths: a borrow holder further down the stack must never
    /// run again, and no other reference obtained from the cell may be used afterwards.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn force_access(&self) -> &mut T {
        &mut *self.inner.as_ptr()
    }
}

unsafe impl<T> Sync for UpCell<T> {}
