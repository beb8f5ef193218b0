//! Test data: generated sign-up users and `{{user.*}}` placeholders

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A user that passes the sign-up form's validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl ValidUser {
    /// Random names, a unique `@example.com` address and a password with
    /// upper, lower, digit and special characters (9 chars)
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let first_name = capitalize(&random_lowercase(&mut rng, 6));
        let last_name = capitalize(&random_lowercase(&mut rng, 6));
        let email = format!(
            "{}.{}+{}@example.com",
            first_name.to_lowercase(),
            last_name.to_lowercase(),
            Utc::now().timestamp_millis()
        );
        let password = format!("Aa1@{}", random_lowercase(&mut rng, 5));

        Self {
            first_name,
            last_name,
            email,
            password,
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "first_name" => Some(&self.first_name),
            "last_name" => Some(&self.last_name),
            "email" => Some(&self.email),
            "password" => Some(&self.password),
            _ => None,
        }
    }
}

fn random_lowercase<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Replace `{{user.<field>}}` placeholders. Unknown placeholders, or any
/// placeholder when no user was generated, are left as-is.
pub fn interpolate(template: &str, user: Option<&ValidUser>) -> String {
    let Some(user) = user else {
        return template.to_string();
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = after[..end].trim();
        match key.strip_prefix("user.").and_then(|field| user.field(field)) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> ValidUser {
        ValidUser {
            first_name: "Abcdef".into(),
            last_name: "Ghijkl".into(),
            email: "abcdef.ghijkl+1@example.com".into(),
            password: "Aa1@xyzab".into(),
        }
    }

    #[test]
    fn test_generated_user_is_valid() {
        let user = ValidUser::generate();
        assert_eq!(user.first_name.len(), 6);
        assert!(user.first_name.chars().next().unwrap().is_ascii_uppercase());
        assert!(user.email.ends_with("@example.com"));
        assert!(user.email.starts_with(&user.first_name.to_lowercase()));
        assert!(user.password.len() >= 8);
        assert!(user.password.chars().any(|c| c.is_ascii_uppercase()));
        assert!(user.password.chars().any(|c| c.is_ascii_digit()));
        assert!(user.password.contains('@'));
    }

    #[test]
    fn test_interpolate() {
        let user = user();
        assert_eq!(interpolate("{{user.email}}", Some(&user)), "abcdef.ghijkl+1@example.com");
        assert_eq!(
            interpolate("{{ user.first_name }} {{user.last_name}}", Some(&user)),
            "Abcdef Ghijkl"
        );
        assert_eq!(interpolate("{{user.age}}", Some(&user)), "{{user.age}}");
        assert_eq!(interpolate("open {{user.email", Some(&user)), "open {{user.email");
        assert_eq!(interpolate("{{user.email}}", None), "{{user.email}}");
        assert_eq!(interpolate("Test@123", Some(&user)), "Test@123");
    }
}
