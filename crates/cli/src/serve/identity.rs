//! Caller identity from request headers.
//!
//! Authentication happens upstream; this server trusts `X-User-Id` and
//! `X-User-Role` as set by the gateway in front of it.

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use hireline_core::{Actor, Role};

use super::error::ApiError;

pub(crate) const USER_ID_HEADER: &str = "x-user-id";
pub(crate) const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller of a mutating or scoped route.
pub(crate) struct CurrentUser(pub(crate) Actor);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthenticated("missing X-User-Id header"))?;
        let role = header(USER_ROLE_HEADER)
            .ok_or_else(|| ApiError::unauthenticated("missing X-User-Role header"))?
            .parse::<Role>()
            .map_err(ApiError::bad_request)?;

        Ok(CurrentUser(Actor::new(user_id, role)))
    }
}

/// Read routes take `Option<CurrentUser>`: no identity headers at all is an
/// anonymous caller, a partial or malformed identity is still rejected.
impl<S> OptionalFromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let anonymous = !parts.headers.contains_key(USER_ID_HEADER)
            && !parts.headers.contains_key(USER_ROLE_HEADER);
        if anonymous {
            return Ok(None);
        }
        <CurrentUser as FromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}

/// The caller as an optional [`Actor`], for redacting responses.
pub(crate) fn viewer(user: &Option<CurrentUser>) -> Option<&Actor> {
    user.as_ref().map(|CurrentUser(actor)| actor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(headers: &[(&str, &str)]) -> Result<Actor, ApiError> {
        let mut builder = Request::builder().uri("/projects");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        <CurrentUser as FromRequestParts<()>>::from_request_parts(&mut parts, &())
            .await
            .map(|CurrentUser(a)| a)
    }

    #[tokio::test]
    async fn reads_user_and_role() {
        let actor = extract(&[("X-User-Id", "alice"), ("X-User-Role", "Client")])
            .await
            .unwrap();
        assert_eq!(actor, Actor::client("alice"));
    }

    #[tokio::test]
    async fn missing_headers_are_unauthenticated() {
        let err = extract(&[("X-User-Role", "admin")]).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        let err = extract(&[("X-User-Id", "root")]).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    async fn extract_optional(headers: &[(&str, &str)]) -> Result<Option<Actor>, ApiError> {
        let mut builder = Request::builder().uri("/projects");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        <CurrentUser as OptionalFromRequestParts<()>>::from_request_parts(&mut parts, &())
            .await
            .map(|user| user.map(|CurrentUser(a)| a))
    }

    #[tokio::test]
    async fn optional_identity_allows_anonymous_only_when_absent() {
        assert_eq!(extract_optional(&[]).await.unwrap(), None);
        assert_eq!(
            extract_optional(&[("X-User-Id", "root"), ("X-User-Role", "admin")])
                .await
                .unwrap(),
            Some(Actor::admin("root"))
        );
        let err = extract_optional(&[("X-User-Id", "root")]).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_role_is_a_bad_request() {
        let err = extract(&[("X-User-Id", "eve"), ("X-User-Role", "owner")])
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
