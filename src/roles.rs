use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Teacher, Role::Student];

    /// Accepts the stored keys plus the Portuguese labels the web forms send.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_lowercase().as_str() {
            "admin" | "administrador" | "administrator" => Some(Role::Admin),
            "teacher" | "professor" => Some(Role::Teacher),
            "student" | "aluno" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    /// Legacy permission level: 1 admin, 2 teacher, 3 student.
    pub fn permission(self) -> i64 {
        match self {
            Role::Admin => 1,
            Role::Teacher => 2,
            Role::Student => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Admin => "Administrador",
            Role::Teacher => "Professor",
            Role::Student => "Aluno",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_english_and_portuguese_keys() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" Administrador "), Some(Role::Admin));
        assert_eq!(Role::parse("professor"), Some(Role::Teacher));
        assert_eq!(Role::parse("ALUNO"), Some(Role::Student));
        assert_eq!(Role::parse("janitor"), None);
    }

    #[test]
    fn permission_levels_follow_role_rank() {
        let levels: Vec<i64> = Role::ALL.iter().map(|r| r.permission()).collect();
        assert_eq!(levels, vec![1, 2, 3]);
    }
}
