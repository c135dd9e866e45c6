//! Debug-only write-in-progress detector.
//!
//! A table raises its flag for the duration of every mutation. A mutation
//! that unwinds half way (a panicking `Hash` or `Eq`) leaves the flag raised,
//! and the next operation on the table reports the broken state instead of
//! reading half-updated buckets. In release builds this compiles to nothing.

#[derive(Debug, Default)]
pub(crate) struct WriteFlag {
    #[cfg(debug_assertions)]
    writing: bool,
}

impl WriteFlag {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            writing: false,
        }
    }

    /// Marks the start of a mutation. Panics if another one never finished.
    #[inline(always)]
    pub(crate) fn begin(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(!self.writing, "concurrent set writes");
            self.writing = true;
        }
    }

    /// Marks the end of a mutation started with [`begin`](Self::begin).
    #[inline(always)]
    pub(crate) fn end(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(self.writing, "concurrent set writes");
            self.writing = false;
        }
    }

    /// Panics with `msg` if a mutation is in progress.
    #[inline(always)]
    #[allow(unused_variables)]
    pub(crate) fn assert_idle(&self, msg: &'static str) {
        #[cfg(debug_assertions)]
        {
            if self.writing {
                panic!("{}", msg);
            }
        }
    }

    #[inline(always)]
    pub(crate) fn check_write(&self) {
        self.assert_idle("concurrent set writes");
    }

    #[inline(always)]
    pub(crate) fn check_read(&self) {
        self.assert_idle("concurrent set read and set write");
    }

    #[inline(always)]
    pub(crate) fn check_iter(&self) {
        self.assert_idle("concurrent set iteration and set write");
    }

    #[inline(always)]
    pub(crate) fn check_clone(&self) {
        self.assert_idle("concurrent set clone and set write");
    }
}
