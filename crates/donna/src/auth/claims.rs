//! JWT claims.

use serde::{Deserialize, Serialize};

/// Claims carried by a Donna session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject; the user's email for minted tokens.
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl Claims {
    pub fn email(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.sub)
    }

    /// Name, falling back to the local part of the email.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => {
                let email = self.email();
                email.split('@').next().unwrap_or(email)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallbacks() {
        let mut claims = Claims {
            sub: "ada@example.com".to_string(),
            email: None,
            name: None,
            exp: 0,
            iat: None,
        };
        assert_eq!(claims.email(), "ada@example.com");
        assert_eq!(claims.display_name(), "ada");

        claims.name = Some("Ada Lovelace".to_string());
        assert_eq!(claims.display_name(), "Ada Lovelace");
    }
}
