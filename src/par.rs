//! Serial/rayon switch for the per-row and per-body loops.
//!
//! Every helper writes each output element from exactly one closure call, so
//! results do not depend on thread count or scheduling.

pub(crate) fn for_each_mut<T, F>(items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        items
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, item)| f(i, item));
    }

    #[cfg(not(feature = "parallel"))]
    {
        items
            .iter_mut()
            .enumerate()
            .for_each(|(i, item)| f(i, item));
    }
}

pub(crate) fn try_for_each_mut<T, E, F>(items: &mut [T], f: F) -> Result<(), E>
where
    T: Send,
    E: Send,
    F: Fn(&mut T) -> Result<(), E> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        items.par_iter_mut().try_for_each(f)
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.iter_mut().try_for_each(f)
    }
}

pub(crate) fn map_collect<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        items.par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.iter().map(f).collect()
    }
}
