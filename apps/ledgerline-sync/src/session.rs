use ledgerline_proto::UserId;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: UserId,
    pub name: Option<String>,
}

impl SessionUser {
    pub fn new(id: UserId) -> Self {
        Self { id, name: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Identity of the signed-in user, owned by the REST login flow.
pub trait SessionProvider: Send + Sync + 'static {
    fn current_user(&self) -> Option<SessionUser>;
}

/// Session whose user is set by the host.
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<SessionUser>>,
}

impl StaticSession {
    pub fn signed_in(user: SessionUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: SessionUser) {
        *self.user.write() = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<SessionUser> {
        self.user.read().clone()
    }
}
