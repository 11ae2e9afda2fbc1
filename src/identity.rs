//! Caller identity as forwarded by the authenticating gateway.
//!
//! Token verification happens upstream; this service trusts the
//! `x-user-*` / `x-team-id` headers and only parses them.

use std::{fmt, str::FromStr};

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dao::models::{TeamId, UserId},
    error::AppError,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const TEAM_ID_HEADER: &str = "x-team-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Platform role of a caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Organizer,
    Admin,
}

impl Role {
    pub fn can_manage_events(self) -> bool {
        matches!(self, Role::Organizer | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Organizer => "organizer",
            Role::Admin => "admin",
        })
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "organizer" => Ok(Role::Organizer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// Who is calling. `user_id == None` is an anonymous guest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub user_id: Option<UserId>,
    pub role: Role,
    pub team_id: Option<TeamId>,
    pub name: Option<String>,
}

impl Identity {
    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    /// Display name used in presence lists and chat messages.
    pub fn display_name(&self) -> String {
        match (&self.name, self.user_id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => format!("user-{id}"),
            (None, None) => "guest".to_owned(),
        }
    }

    fn from_parts(parts: &Parts) -> Result<Self, AppError> {
        let user_id = parse_header::<UserId>(parts, USER_ID_HEADER)?;
        let team_id = parse_header::<TeamId>(parts, TEAM_ID_HEADER)?;
        let role = parse_header::<Role>(parts, USER_ROLE_HEADER)?.unwrap_or_default();
        let name = header_str(parts, USER_NAME_HEADER)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        if user_id.is_none() {
            return Ok(Self::default());
        }

        Ok(Self {
            user_id,
            role,
            team_id,
            name,
        })
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_header<T>(parts: &Parts, name: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match header_str(parts, name).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::BadRequest(format!("invalid `{name}` header: {err}"))),
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Identity::from_parts(parts)
    }
}
