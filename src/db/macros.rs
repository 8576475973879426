//! Driver dispatch macro.
//!
//! Each driver keeps its own concrete pool type, so code that does the same
//! thing on every driver is written once per variant. This macro keeps those
//! match statements short and linear.

/// Generate match arms over the [`DbPool`](crate::db::DbPool) variants.
///
/// ```ignore
/// let stats = impl_db_dispatch!(&pool, {
///     MySql(p) => p.size(),
///     Postgres(p) => p.size(),
///     Sqlite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}
