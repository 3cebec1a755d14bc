use std::collections::HashMap;
use std::sync::RwLock;

/// A named bundle of permission strings. `"*"` grants everything
/// (legacy admin); anything else must equal a required permission
/// verbatim — `api:*:read` is never expanded against `api:entries:read`
/// (see `is_permitted`).
#[derive(Debug, Clone)]
pub struct Role {
    pub name: &'static str,
    pub permissions: Vec<&'static str>,
}

fn default_roles() -> Vec<Role> {
    vec![
        Role { name: "admin", permissions: vec!["*"] },
        Role {
            name: "readable",
            permissions: vec!["*:*:read"],
        },
        Role {
            name: "careportal",
            permissions: vec!["api:treatments:create", "api:treatments:update", "*:*:read"],
        },
        Role {
            name: "activity",
            permissions: vec!["api:activity:create", "*:*:read"],
        },
        Role {
            name: "devicestatus-upload",
            permissions: vec!["api:devicestatus:create", "*:*:read"],
        },
        Role {
            name: "cgm-uploader",
            permissions: vec!["api:entries:create", "*:*:read"],
        },
        Role {
            name: "status-only",
            permissions: vec!["api:status:read"],
        },
        Role {
            name: "denied",
            permissions: vec![],
        },
    ]
}

#[derive(Debug, Clone)]
struct Subject {
    name: String,
    role_names: Vec<String>,
}

/// Resolves bearer tokens and API secrets to subjects, and subjects to
/// permission decisions. Holds the static role table plus a token table
/// seeded from configuration; both are fixed at startup.
pub struct AuthorityTable {
    roles: HashMap<&'static str, Role>,
    subjects_by_token: RwLock<HashMap<String, Subject>>,
    subjects_by_sha1: RwLock<HashMap<String, String>>,
}

impl AuthorityTable {
    pub fn new(api_secret_sha1: Option<&str>, default_role: &str) -> Self {
        let roles = default_roles().into_iter().map(|r| (r.name, r)).collect();

        let mut subjects_by_token = HashMap::new();
        subjects_by_token.insert(
            "anonymous".to_string(),
            Subject {
                name: "anonymous".to_string(),
                role_names: vec![default_role.to_string()],
            },
        );

        let mut subjects_by_sha1 = HashMap::new();
        if let Some(digest) = api_secret_sha1 {
            subjects_by_token.insert(
                "admin-token".to_string(),
                Subject {
                    name: "admin".to_string(),
                    role_names: vec!["admin".to_string()],
                },
            );
            subjects_by_sha1.insert(digest.to_lowercase(), "admin-token".to_string());
        }

        Self {
            roles,
            subjects_by_token: RwLock::new(subjects_by_token),
            subjects_by_sha1: RwLock::new(subjects_by_sha1),
        }
    }

    /// Resolves a raw bearer token (or an api-secret sha1 digest, as the
    /// legacy API secret scheme uses) to a subject name. The client already
    /// sends the sha1 digest as the token — it is looked up directly,
    /// never re-hashed. Unknown tokens fall back to `"anonymous"`.
    pub fn resolve(&self, token: Option<&str>) -> String {
        let Some(token) = token else {
            return "anonymous".to_string();
        };

        if self.subjects_by_token.read().unwrap().contains_key(token) {
            return token.to_string();
        }

        if let Some(canonical) = self.subjects_by_sha1.read().unwrap().get(token) {
            return canonical.clone();
        }

        "anonymous".to_string()
    }

    /// Whether `subject` carries `required` (a `resource:action` string).
    /// `"*"` on a role allows anything; otherwise a permission must equal
    /// `required` verbatim. `api:*:read`-style segment wildcards are
    /// referenced by the role table above but never expanded here — that
    /// gap is load-bearing, not a bug (see the design ledger).
    pub fn is_permitted(&self, subject: &str, required: &str) -> bool {
        let subjects = self.subjects_by_token.read().unwrap();
        let Some(subject) = subjects.get(subject) else {
            return false;
        };

        for role_name in &subject.role_names {
            let Some(role) = self.roles.get(role_name.as_str()) else {
                continue;
            };
            for permission in &role.permissions {
                if *permission == "*" || *permission == required {
                    return true;
                }
            }
        }
        false
    }
}

fn sha1_hex(data: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cgm_uploader_may_create_entries_readable_may_not() {
        let table = AuthorityTable::new(None, "readable");
        let mut subjects = table.subjects_by_token.write().unwrap();
        subjects.insert(
            "uploader-token".to_string(),
            Subject {
                name: "uploader".to_string(),
                role_names: vec!["cgm-uploader".to_string()],
            },
        );
        drop(subjects);

        assert!(table.is_permitted("uploader-token", "api:entries:create"));
        assert!(!table.is_permitted("anonymous", "api:entries:create"));
    }

    #[test]
    fn readable_wildcard_permission_does_not_expand_against_reads() {
        // Documents the preserved gap: `*:*:read` never matches a
        // concrete `api:entries:read` requirement under verbatim matching.
        let table = AuthorityTable::new(None, "readable");
        assert!(!table.is_permitted("anonymous", "api:entries:read"));
    }

    #[test]
    fn admin_token_resolves_via_sha1_and_gets_wildcard() {
        let digest = sha1_hex(b"s3cr3t");
        let table = AuthorityTable::new(Some(&digest), "readable");
        // The client sends the digest itself as the token, not the plaintext secret.
        let subject = table.resolve(Some(&digest));
        assert_eq!(subject, "admin-token");
        assert!(table.is_permitted(&subject, "api:treatments:delete"));
    }

    #[test]
    fn unknown_token_falls_back_to_anonymous() {
        let table = AuthorityTable::new(None, "denied");
        let subject = table.resolve(Some("garbage"));
        assert_eq!(subject, "anonymous");
        assert!(!table.is_permitted(&subject, "api:entries:read"));
    }
}
