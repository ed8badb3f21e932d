//! Backend routes, relative to the configured base URL.

pub const LOGIN: &str = "auth/login/";
pub const REGISTER: &str = "auth/register/";
pub const LOGOUT: &str = "auth/logout/";
pub const VERIFY_EMAIL: &str = "auth/verify-email/";
pub const PASSWORD_RESET: &str = "auth/password-reset/";
pub const PASSWORD_RESET_CONFIRM: &str = "auth/password-reset-confirm/";
pub const TOKEN_REFRESH: &str = "auth/token/refresh/";
pub const PROFILE: &str = "auth/profile/";

pub const CONTENT_SECTIONS: &str = "content/sections/";
pub const PLANS: &str = "plans/";
pub const STUDENTS: &str = "users/students/";
pub const TEACHERS: &str = "users/teachers/";
pub const USERS: &str = "users/";

/// Routes that never carry a bearer credential.
const PUBLIC_ROUTES: [&str; 6] = [
    LOGIN,
    REGISTER,
    VERIFY_EMAIL,
    PASSWORD_RESET,
    PASSWORD_RESET_CONFIRM,
    TOKEN_REFRESH,
];

fn normalize(endpoint: &str) -> &str {
    let path = endpoint.split(['?', '#']).next().unwrap_or_default();
    path.trim_start_matches('/')
}

/// Whether `endpoint` is one of the public authentication routes.
/// `auth/password-reset-confirm/<uid>/<token>/` matches by prefix.
pub fn is_public(endpoint: &str) -> bool {
    let path = normalize(endpoint);
    PUBLIC_ROUTES.iter().any(|route| {
        if *route == PASSWORD_RESET_CONFIRM {
            path.starts_with(route)
        } else {
            path == *route || path == route.trim_end_matches('/')
        }
    })
}

pub fn is_refresh(endpoint: &str) -> bool {
    let path = normalize(endpoint);
    path == TOKEN_REFRESH || path == TOKEN_REFRESH.trim_end_matches('/')
}

pub fn password_reset_confirm(encoded_id: &str, token: &str) -> String {
    format!("{}{}/{}/", PASSWORD_RESET_CONFIRM, encoded_id, token)
}

pub fn content_section(id: i64) -> String {
    format!("{}{}/", CONTENT_SECTIONS, id)
}

pub fn plan(id: i64) -> String {
    format!("{}{}/", PLANS, id)
}

pub fn user(id: i64) -> String {
    format!("{}{}/", USERS, id)
}
