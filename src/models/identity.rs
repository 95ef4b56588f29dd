use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    User,
    Service,
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub kind: TokenKind,
    /// User id, or service name for service tokens.
    pub subject: String,
    pub firm_id: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn user(subject: impl Into<String>, firm_id: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::User,
            subject: subject.into(),
            firm_id: firm_id.into(),
            roles: Vec::new(),
        }
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Service,
            subject: name.into(),
            firm_id: String::new(),
            roles: Vec::new(),
        }
    }

    /// Principal the caller acts as: `{firm}/u/{user}` or `s/{service}`.
    pub fn principal(&self) -> String {
        match self.kind {
            TokenKind::User => format!("{}/u/{}", self.firm_id, self.subject),
            TokenKind::Service => format!("s/{}", self.subject),
        }
    }

    /// Every principal held by the caller, including `r/{role}` for its roles.
    pub fn principals(&self) -> Vec<String> {
        let mut prpls = vec![self.principal()];
        for role in &self.roles {
            let role_prpl = format!("r/{}", role);
            if !prpls.contains(&role_prpl) {
                prpls.push(role_prpl);
            }
        }
        prpls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principals_include_roles_once() {
        let mut id = Identity::user("42", "acme");
        id.roles = vec!["Editor".into(), "Editor".into()];
        assert_eq!(id.principals(), vec!["acme/u/42".to_string(), "r/Editor".to_string()]);
        assert_eq!(Identity::service("colabri-app").principal(), "s/colabri-app");
    }
}
