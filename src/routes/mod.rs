/// Router Module Index
///
/// Splits the API surface by who may call it. Authentication is applied as a layer on
/// the protected routers in `create_router`; role checks happen in the handlers through
/// the `Authorized<P>` extractor.

/// Routes reachable without a token (registration and login).
pub mod public;

/// Routes for any signed-in account, citizen or admin.
pub mod authenticated;

/// Routes restricted to the `ADMIN` role.
pub mod admin;
