use serde::{Deserialize, Serialize};

/// Admin account as returned by the profile endpoint. Server-owned; the client
/// only ever holds a cached copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_staff: bool,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if full.is_empty() { self.username.clone() } else { full.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_partial_profile_payload() {
        let p: UserProfile = serde_json::from_str(r#"{"id": 3, "username": "dispatch", "is_staff": true}"#).unwrap();
        assert_eq!(p.id, 3);
        assert!(p.is_staff);
        assert!(!p.is_superuser);
        assert_eq!(p.role, None);
        assert_eq!(p.display_name(), "dispatch");
    }

    #[test]
    fn display_name_prefers_full_name() {
        let p = UserProfile { id: 1, username: "ada".into(), first_name: "Ada".into(), last_name: "Obi".into(), ..Default::default() };
        assert_eq!(p.display_name(), "Ada Obi");
    }
}
