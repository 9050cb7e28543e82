#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

pub mod recover;

pub use self::recover::Recover;
pub use std::convert::Infallible;

/// A boxed, dynamically-typed error.
///
/// Component crates define their own `thiserror` types; this alias is the
/// currency at stack seams, where the concrete failure is inspected (if at
/// all) via [`is_caused_by`] or [`cause_ref`].
pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Determines whether the provided error was caused by an `E` typed error.
pub fn is_caused_by<E: std::error::Error + 'static>(
    mut error: &(dyn std::error::Error + 'static),
) -> bool {
    loop {
        if error.is::<E>() {
            return true;
        }
        error = match error.source() {
            Some(e) => e,
            None => return false,
        };
    }
}

/// Finds an `E` typed error in the provided error's sources.
pub fn cause_ref<'e, E: std::error::Error + 'static>(
    mut error: &'e (dyn std::error::Error + 'static),
) -> Option<&'e E> {
    loop {
        if let Some(e) = error.downcast_ref::<E>() {
            return Some(e);
        }
        error = error.source()?;
    }
}

#[cfg(test)]
mod tests {
    #[derive(Debug, thiserror::Error)]
    enum Outer {
        #[error("nothing to see here")]
        Standalone,
        #[error("{0}")]
        Wrapped(#[source] Inner),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn is_caused_by() {
        assert!(super::is_caused_by::<Inner>(&Outer::Wrapped(Inner)));
        assert!(super::is_caused_by::<Outer>(&Outer::Standalone));
        assert!(!super::is_caused_by::<Inner>(&Outer::Standalone));
    }

    #[test]
    fn cause_ref() {
        assert!(super::cause_ref::<Inner>(&Outer::Wrapped(Inner)).is_some());
        assert!(super::cause_ref::<Inner>(&Outer::Standalone).is_none());
    }
}
