use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{to_api_error, ApiError};

// Заголовки выставляет внешний auth-шлюз; сам сервис сессии не проверяет
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Counselor,
    Admin,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "counselor" => Some(Role::Counselor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Кто вызывает API. Анонимный вызов - `user_id == None`.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Option<Uuid>,
    pub role: Role,
}

impl Caller {
    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Counselor)
    }

    pub fn require_authenticated(&self) -> Result<Uuid, (StatusCode, Json<ApiError>)> {
        self.user_id
            .ok_or_else(|| to_api_error(StatusCode::UNAUTHORIZED, "Authentication required"))
    }

    pub fn require_privileged(&self) -> Result<(), (StatusCode, Json<ApiError>)> {
        self.require_authenticated()?;
        if self.is_privileged() {
            Ok(())
        } else {
            Err(to_api_error(StatusCode::FORBIDDEN, "Insufficient permissions"))
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let Some(raw_id) = header(USER_ID_HEADER) else {
            return Ok(Caller { user_id: None, role: Role::User });
        };

        let user_id = Uuid::parse_str(raw_id)
            .map_err(|_| to_api_error(StatusCode::BAD_REQUEST, "Malformed user id header"))?;

        // Неизвестная роль - обычный пользователь
        let role = header(USER_ROLE_HEADER).and_then(Role::parse).unwrap_or(Role::User);

        Ok(Caller { user_id: Some(user_id), role })
    }
}

/// JSON-тело запроса. Ошибки разбора отдаются в общем формате `ApiError`,
/// а не текстом axum.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                let status = match rejection {
                    JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    _ => StatusCode::BAD_REQUEST,
                };
                Err(to_api_error(status, &rejection.body_text()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde::Deserialize;

    async fn extract(request: Request<()>) -> Result<Caller, (StatusCode, Json<ApiError>)> {
        let (mut parts, _) = request.into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_headers_mean_anonymous() {
        let caller = extract(Request::new(())).await.unwrap();
        assert!(caller.user_id.is_none());
        assert!(!caller.is_privileged());
        assert!(caller.require_authenticated().is_err());
    }

    #[tokio::test]
    async fn role_header_grants_privileges() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(USER_ID_HEADER, id.to_string())
            .header(USER_ROLE_HEADER, "Counselor")
            .body(())
            .unwrap();

        let caller = extract(request).await.unwrap();
        assert_eq!(caller.user_id, Some(id));
        assert!(caller.is_privileged());
        assert!(caller.require_privileged().is_ok());
    }

    #[tokio::test]
    async fn malformed_user_id_is_rejected() {
        let request = Request::builder().header(USER_ID_HEADER, "42").body(()).unwrap();
        let (status, _) = extract(request).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[derive(Debug, Deserialize)]
    struct Payload {
        count: u32,
    }

    fn json_request(content_type: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(value) = content_type {
            builder = builder.header("content-type", value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn json_body_is_extracted() {
        let request = json_request(Some("application/json"), r#"{"count": 3}"#);
        let ApiJson(payload) = ApiJson::<Payload>::from_request(request, &()).await.unwrap();
        assert_eq!(payload.count, 3);
    }

    #[tokio::test]
    async fn body_errors_are_bad_request() {
        for body in [r#"{"count": "three"}"#, r#"{"count": 3"#, "{}"] {
            let request = json_request(Some("application/json"), body);
            let (status, _) = ApiJson::<Payload>::from_request(request, &()).await.unwrap_err();
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        }
    }

    #[tokio::test]
    async fn missing_content_type_is_unsupported_media_type() {
        let request = json_request(None, r#"{"count": 3}"#);
        let (status, _) = ApiJson::<Payload>::from_request(request, &()).await.unwrap_err();
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
