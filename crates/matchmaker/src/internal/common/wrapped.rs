use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Shared, single-threaded ownership of a value.
///
/// The negotiation state is owned by one task; other tasks on the same
/// thread (signal handlers, the admin surface) reach it through this handle.
#[derive(Default, Debug)]
pub struct WrappedRcRefCell<T: ?Sized> {
    inner: Rc<RefCell<T>>,
}

impl<T> WrappedRcRefCell<T> {
    #[inline]
    pub fn wrap(t: T) -> Self {
        WrappedRcRefCell {
            inner: Rc::new(RefCell::new(t)),
        }
    }
}

impl<T: ?Sized> WrappedRcRefCell<T> {
    #[inline]
    #[track_caller]
    pub fn get(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    #[inline]
    #[track_caller]
    pub fn get_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }
}

impl<T: ?Sized> Clone for WrappedRcRefCell<T> {
    #[inline]
    fn clone(&self) -> Self {
        WrappedRcRefCell {
            inner: self.inner.clone(),
        }
    }
}
