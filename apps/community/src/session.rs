//! Caller identity and role capabilities.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user id in `x-user-id`. The role is never taken from the request: it is
//! read from the caller's stored profile. Every service takes an explicit
//! `Session` instead of reading ambient state.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ChatRoom, Role, UserProfile};
use crate::store::{Filter, Query, Store, StoreExt};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
}

impl Session {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn student(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Student)
    }

    pub fn counselor(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Counselor)
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Admin)
    }

    /// Counselors and admins may remove anyone's content.
    pub fn can_moderate(&self) -> bool {
        matches!(self.role, Role::Counselor | Role::Admin)
    }

    pub fn room_scope(&self) -> RoomScope {
        RoomScope::for_session(self)
    }

    /// Session of an authenticated user, with the role from their profile.
    /// A user without a profile row is a student.
    pub async fn load(store: &dyn Store, user_id: Uuid) -> Result<Self, AppError> {
        let profiles: Vec<UserProfile> = store
            .fetch_all(&Query::of::<UserProfile>().filter(Filter::by_id(user_id)))
            .await?;
        let role = match profiles.first() {
            Some(profile) => profile.role,
            None => {
                debug!(user_id = %user_id, "no profile for caller; defaulting to student");
                Role::Student
            }
        };
        Ok(Session::new(user_id, role))
    }
}

/// Maps a stored role string to a capability tier. Anything unrecognised
/// gets the least privileged role.
pub fn resolve_role(raw: Option<&str>) -> Role {
    match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
        Some("admin") => Role::Admin,
        Some("counselor") => Role::Counselor,
        _ => Role::Student,
    }
}

/// Which chat rooms a session may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomScope {
    All,
    /// Unassigned rooms plus the rooms assigned to this counselor.
    PoolAndAssigned(Uuid),
    /// Only the room this student owns.
    Owned(Uuid),
}

impl RoomScope {
    pub fn for_session(session: &Session) -> Self {
        match session.role {
            Role::Admin => RoomScope::All,
            Role::Counselor => RoomScope::PoolAndAssigned(session.user_id),
            Role::Student => RoomScope::Owned(session.user_id),
        }
    }

    pub fn permits(&self, room: &ChatRoom) -> bool {
        match self {
            RoomScope::All => true,
            RoomScope::PoolAndAssigned(me) => room.counselor_id.map_or(true, |c| c == *me),
            RoomScope::Owned(me) => room.student_id == *me,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    Arc<dyn Store>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(AppError::Unauthorized)?;
        let store = <Arc<dyn Store> as FromRef<S>>::from_ref(state);
        Session::load(store.as_ref(), user_id).await
    }
}
