use songforge_core::UserId;

/// Authenticated caller for a request.
///
/// Inserted by [`crate::middleware::user_middleware`]; present on every
/// user-scoped route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UserContext {
    user_id: UserId,
}

impl UserContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
