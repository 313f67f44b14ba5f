/// Middleware module
///
/// Request guards applied to protected routes.

mod access_guard;

pub use access_guard::AccessGuard;
