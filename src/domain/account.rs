//! Account view-models
//!
//! User records as exposed by the deployed service's account API, with the
//! field constraints its request validation enforces.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use validator::Validate;

/// Either an email-shaped login or a plain handle without whitespace
pub const LOGIN_PATTERN: &str = r"^(?:[a-zA-Z0-9!$&*+=?^_`{|}~.-]+@[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*|[_.@A-Za-z0-9-]+)$";

static LOGIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LOGIN_PATTERN).expect("login pattern is a valid regex"));

/// Domain user record
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub login: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub activated: bool,
    pub lang_key: Option<String>,
    pub created_by: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub last_modified_by: Option<String>,
    pub last_modified_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authorities: BTreeSet<String>,
}

/// User view-model with the fields an administrator manages
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserDto {
    pub id: Option<i64>,

    #[validate(required, length(min = 1, max = 50), regex(path = *LOGIN_REGEX))]
    pub login: Option<String>,

    #[validate(length(max = 50))]
    pub first_name: Option<String>,

    #[validate(length(max = 50))]
    pub last_name: Option<String>,

    #[validate(email, length(min = 5, max = 254))]
    pub email: Option<String>,

    #[validate(length(max = 256))]
    pub image_url: Option<String>,

    #[serde(default)]
    pub activated: bool,

    #[validate(length(min = 2, max = 10))]
    pub lang_key: Option<String>,

    pub created_by: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub last_modified_by: Option<String>,
    pub last_modified_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub authorities: BTreeSet<String>,
}

impl From<&User> for AdminUserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            login: user.login.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            image_url: user.image_url.clone(),
            activated: user.activated,
            lang_key: user.lang_key.clone(),
            created_by: user.created_by.clone(),
            created_date: user.created_date,
            last_modified_by: user.last_modified_by.clone(),
            last_modified_date: user.last_modified_date,
            authorities: user.authorities.clone(),
        }
    }
}

/// Public user view-model
///
/// Equality and hashing use both the id and the login.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
pub struct UserDto {
    pub id: Option<i64>,
    pub login: Option<String>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            login: user.login.clone(),
        }
    }
}

impl fmt::Display for UserDto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "null".to_string());
        write!(
            f,
            "UserDto{{id={}, login='{}'}}",
            id,
            self.login.as_deref().unwrap_or("null")
        )
    }
}

/// Password change request. Neither field carries a constraint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeDto {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

impl PasswordChangeDto {
    pub fn new(current_password: impl Into<String>, new_password: impl Into<String>) -> Self {
        Self {
            current_password: Some(current_password.into()),
            new_password: Some(new_password.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn admin_user() -> AdminUserDto {
        AdminUserDto {
            login: Some("testuser".to_string()),
            email: Some("test@example.com".to_string()),
            first_name: Some("Test".to_string()),
            last_name: Some("User".to_string()),
            activated: true,
            lang_key: Some("en".to_string()),
            ..Default::default()
        }
    }

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_valid_admin_user() {
        assert!(admin_user().validate().is_ok());
    }

    #[test]
    fn test_admin_user_invalid_email() {
        let mut dto = admin_user();
        dto.email = Some("invalid-email".to_string());
        let errors = dto.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));
    }

    #[test]
    fn test_admin_user_null_email_is_allowed() {
        let mut dto = admin_user();
        dto.email = None;
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn test_admin_user_null_login() {
        let mut dto = admin_user();
        dto.login = None;
        let errors = dto.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("login"));
    }

    #[test]
    fn test_admin_user_login_with_spaces() {
        let mut dto = admin_user();
        dto.login = Some("invalid login with spaces".to_string());
        assert!(dto.validate().is_err());
    }

    #[test]
    fn test_admin_user_login_forms() {
        for login in ["admin", "john.doe", "user-1_x", "jane@example.com"] {
            let mut dto = admin_user();
            dto.login = Some(login.to_string());
            assert!(dto.validate().is_ok(), "{} should be accepted", login);
        }
        let mut dto = admin_user();
        dto.login = Some("a".repeat(51));
        assert!(dto.validate().is_err());
    }

    #[test]
    fn test_admin_user_lang_key_bounds() {
        let mut dto = admin_user();
        dto.lang_key = Some("e".to_string());
        assert!(dto.validate().is_err());
        dto.lang_key = None;
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn test_admin_user_from_user() {
        let user = User {
            id: Some(1),
            login: Some("testuser".to_string()),
            email: Some("test@example.com".to_string()),
            first_name: Some("Test".to_string()),
            last_name: Some("User".to_string()),
            activated: true,
            lang_key: Some("en".to_string()),
            ..Default::default()
        };

        let dto = AdminUserDto::from(&user);
        assert_eq!(dto.id, Some(1));
        assert_eq!(dto.login.as_deref(), Some("testuser"));
        assert_eq!(dto.email.as_deref(), Some("test@example.com"));
        assert_eq!(dto.first_name.as_deref(), Some("Test"));
        assert_eq!(dto.last_name.as_deref(), Some("User"));
        assert!(dto.activated);
        assert_eq!(dto.lang_key.as_deref(), Some("en"));
    }

    #[test]
    fn test_valid_user_dto() {
        let dto = UserDto {
            id: None,
            login: Some("testuser".to_string()),
        };
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn test_user_dto_from_user() {
        let user = User {
            id: Some(1),
            login: Some("testuser".to_string()),
            ..Default::default()
        };
        let dto = UserDto::from(&user);
        assert_eq!(dto.id, Some(1));
        assert_eq!(dto.login.as_deref(), Some("testuser"));
    }

    #[test]
    fn test_user_dto_equality_and_hash() {
        let a = UserDto {
            id: Some(1),
            login: Some("testuser".to_string()),
        };
        let b = UserDto {
            id: Some(1),
            login: Some("testuser".to_string()),
        };
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = UserDto {
            id: Some(2),
            ..b.clone()
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_user_dto_display() {
        let dto = UserDto {
            id: Some(1),
            login: Some("testuser".to_string()),
        };
        let text = dto.to_string();
        assert!(text.contains("testuser"));
        assert!(text.contains('1'));
    }

    #[test]
    fn test_password_change_without_constraints() {
        let mut dto = PasswordChangeDto::new("currentPassword", "newPassword");
        assert!(dto.validate().is_ok());

        dto.current_password = None;
        assert!(dto.validate().is_ok());

        dto.new_password = None;
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn test_password_change_constructor() {
        let dto = PasswordChangeDto::new("current", "new");
        assert_eq!(dto.current_password.as_deref(), Some("current"));
        assert_eq!(dto.new_password.as_deref(), Some("new"));
    }

    #[test]
    fn test_admin_user_json_is_camel_case() {
        let json = serde_json::to_value(admin_user()).unwrap();
        assert_eq!(json["langKey"], "en");
        assert_eq!(json["firstName"], "Test");
    }
}
