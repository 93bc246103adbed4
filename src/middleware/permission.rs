//! Route-level permission guard.
//!
//! One middleware wraps the whole router: it resolves the permission a
//! request needs from its method and path, authenticates the bearer token and
//! checks the caller's role before any handler runs.

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, middleware::auth::authenticate, models::user::Role, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    AnneesWrite,
    ClassesRead,
    ClassesWrite,
    ElevesRead,
    ElevesWrite,
    Messagerie,
    DisciplineRead,
    DisciplineWrite,
    FinanceRead,
    FinanceWrite,
    AdmissionsRead,
    AdmissionsWrite,
    Audit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    /// Any logged-in user.
    Authenticated,
    Requires(Permission),
}

impl Role {
    pub fn grants(self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Role::Admin => true,
            Role::Directeur => permission != Audit,
            Role::Enseignant => matches!(
                permission,
                ClassesRead | ElevesRead | Messagerie | DisciplineRead | DisciplineWrite
            ),
            Role::Surveillant => matches!(
                permission,
                ClassesRead | ElevesRead | Messagerie | DisciplineRead | DisciplineWrite
            ),
            Role::Comptable => matches!(
                permission,
                ClassesRead | ElevesRead | Messagerie | FinanceRead | FinanceWrite
            ),
            Role::Secretaire => matches!(
                permission,
                ClassesRead
                    | ClassesWrite
                    | ElevesRead
                    | ElevesWrite
                    | Messagerie
                    | FinanceRead
                    | AdmissionsRead
                    | AdmissionsWrite
            ),
        }
    }
}

pub fn access_for(method: &Method, path: &str) -> Access {
    use Permission::*;

    if method == Method::OPTIONS {
        return Access::Public;
    }
    match path {
        "/health" | "/metrics" | "/auth/login" => return Access::Public,
        "/auth/me" => return Access::Authenticated,
        _ => {}
    }

    let read = method == Method::GET || method == Method::HEAD;
    let section = path.trim_start_matches('/').split('/').next().unwrap_or("");
    let pick = |r: Permission, w: Permission| Access::Requires(if read { r } else { w });

    match section {
        "annees-scolaires" if read => Access::Authenticated,
        "annees-scolaires" => Access::Requires(AnneesWrite),
        "classes" => pick(ClassesRead, ClassesWrite),
        "eleves" => pick(ElevesRead, ElevesWrite),
        "messages" => Access::Requires(Messagerie),
        "incidents" | "sanctions" => pick(DisciplineRead, DisciplineWrite),
        "finance" => pick(FinanceRead, FinanceWrite),
        "admissions" => pick(AdmissionsRead, AdmissionsWrite),
        "journal" => Access::Requires(Audit),
        _ => Access::Authenticated,
    }
}

pub async fn enforce(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let access = access_for(request.method(), request.uri().path());
    if access == Access::Public {
        return Ok(next.run(request).await);
    }

    let user = authenticate(request.headers(), &state.config.jwt_secret)?;
    if let Access::Requires(permission) = access {
        if !user.role.grants(permission) {
            tracing::debug!(
                "user {} ({}) denied {} {}",
                user.user_id,
                user.role,
                request.method(),
                request.uri().path()
            );
            return Err(AppError::Forbidden);
        }
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_routes() {
        assert_eq!(access_for(&Method::GET, "/health"), Access::Public);
        assert_eq!(access_for(&Method::POST, "/auth/login"), Access::Public);
        assert_eq!(access_for(&Method::OPTIONS, "/classes"), Access::Public);
    }

    #[test]
    fn reads_and_writes_need_different_permissions() {
        assert_eq!(
            access_for(&Method::GET, "/classes/12"),
            Access::Requires(Permission::ClassesRead)
        );
        assert_eq!(
            access_for(&Method::POST, "/classes"),
            Access::Requires(Permission::ClassesWrite)
        );
        assert_eq!(
            access_for(&Method::PUT, "/incidents/4/statut"),
            Access::Requires(Permission::DisciplineWrite)
        );
        assert_eq!(
            access_for(&Method::GET, "/sanctions/types"),
            Access::Requires(Permission::DisciplineRead)
        );
        assert_eq!(access_for(&Method::GET, "/annees-scolaires"), Access::Authenticated);
        assert_eq!(
            access_for(&Method::POST, "/annees-scolaires/2/activer"),
            Access::Requires(Permission::AnneesWrite)
        );
    }

    #[test]
    fn messaging_is_one_permission() {
        assert_eq!(
            access_for(&Method::GET, "/messages"),
            Access::Requires(Permission::Messagerie)
        );
        assert_eq!(
            access_for(&Method::POST, "/messages/bulk"),
            Access::Requires(Permission::Messagerie)
        );
    }

    #[test]
    fn role_grants() {
        assert!(Role::Admin.grants(Permission::Audit));
        assert!(!Role::Directeur.grants(Permission::Audit));
        assert!(Role::Enseignant.grants(Permission::DisciplineWrite));
        assert!(!Role::Enseignant.grants(Permission::FinanceRead));
        assert!(Role::Comptable.grants(Permission::FinanceWrite));
        assert!(!Role::Comptable.grants(Permission::ClassesWrite));
        assert!(Role::Secretaire.grants(Permission::AdmissionsWrite));
        assert!(!Role::Secretaire.grants(Permission::DisciplineRead));
    }

    #[test]
    fn every_role_can_message() {
        for role in Role::ALL {
            assert!(role.grants(Permission::Messagerie), "{role}");
        }
    }
}
