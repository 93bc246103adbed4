use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(
    /// Staff roles. Each role grants a fixed set of permissions, see
    /// [`crate::middleware::permission`].
    Role {
        Admin => "admin",
        Directeur => "directeur",
        Enseignant => "enseignant",
        Comptable => "comptable",
        Secretaire => "secretaire",
        Surveillant => "surveillant",
    }
);

/// DB row. `role` is kept as TEXT and parsed when building the profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Utilisateur {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub nom: String,
    pub prenom: String,
    pub role: String,
    pub actif: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub nom: String,
    pub prenom: String,
    pub role: Role,
}

impl TryFrom<Utilisateur> for UserProfile {
    type Error = anyhow::Error;

    fn try_from(u: Utilisateur) -> Result<Self, Self::Error> {
        Ok(Self {
            id: u.id,
            role: u.role.parse()?,
            email: u.email,
            nom: u.nom,
            prenom: u.prenom,
        })
    }
}
